// crates/cloudlink-dyncfg/src/function.rs
// ============================================================================
// Module: Dyncfg Config Function
// Description: The `config` function verb served for every host.
// Purpose: Parse `config tree [path] [id]` calls and answer with a status.
// Dependencies: serde_json, shell-words, tracing
// ============================================================================

//! ## Overview
//! [`execute_config_function`] parses a function line with shell quoting and
//! answers with an HTTP-style status code and a JSON body. Only the `tree`
//! action is served; other actions are reported as unknown config ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cloudlink_core::NodeId;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tracing::error;

use crate::model::DyncfgError;
use crate::tree::DyncfgRegistry;
use crate::tree::FunctionAvailability;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Function name every host registers.
pub const CONFIG_FUNCTION: &str = "config";
/// Success.
pub const STATUS_OK: u16 = 200;
/// Malformed call.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Unknown action.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Snapshot could not be produced.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

// ============================================================================
// SECTION: Response
// ============================================================================

/// Result of a function call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl FunctionResponse {
    /// Builds an error response carrying `message`.
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "status": status, "error_message": message }),
        }
    }

    /// Returns true for a 200 response.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Executes a `config` function call for `host`.
#[must_use]
pub fn execute_config_function(
    registry: &DyncfgRegistry,
    host: &NodeId,
    line: &str,
    functions: &dyn FunctionAvailability,
) -> FunctionResponse {
    let words = shell_words::split(line).unwrap_or_default();
    let mut words = words.iter().map(String::as_str);
    let (config, action, path, id) = (words.next(), words.next(), words.next(), words.next());

    if config != Some(CONFIG_FUNCTION) {
        return rejected(line, STATUS_BAD_REQUEST, "invalid function call, expected: config");
    }
    let Some(action) = action.filter(|action| !action.is_empty()) else {
        return rejected(line, STATUS_BAD_REQUEST, "invalid function call, expected: config tree");
    };
    if action != "tree" {
        error!(
            action = %action,
            call = %line,
            "unknown config id in call; the plugin that registered it may not be running"
        );
        return FunctionResponse::error(STATUS_NOT_FOUND, "unknown config id given");
    }

    let path = path.filter(|path| !path.is_empty()).unwrap_or("/");
    let id = id.filter(|id| !id.is_empty());
    match registry.render_tree(host, path, id, functions) {
        Ok(snapshot) => match serde_json::to_value(&snapshot) {
            Ok(body) => FunctionResponse {
                status: STATUS_OK,
                body,
            },
            Err(err) => rejected(line, STATUS_INTERNAL_ERROR, &err.to_string()),
        },
        Err(DyncfgError::InvalidId(_)) => {
            rejected(line, STATUS_BAD_REQUEST, "invalid id given")
        }
        Err(err) => rejected(line, STATUS_INTERNAL_ERROR, &err.to_string()),
    }
}

/// Logs and builds an error response.
fn rejected(line: &str, status: u16, message: &str) -> FunctionResponse {
    error!(call = %line, status = status, "config tree call rejected: {message}");
    FunctionResponse::error(status, message)
}
