//! Config load validation tests for cloudlink-config.
// crates/cloudlink-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, limits).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use cloudlink_config::ConfigError;
use cloudlink_config::MAX_CONFIG_FILE_SIZE;
use cloudlink_config::SyncConfig;
use cloudlink_config::config_toml_example;
use cloudlink_store_sqlite::SqliteStoreMode;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<SyncConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

fn write_config(content: &[u8]) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(content).map_err(|err| err.to_string())?;
    Ok(file)
}

// ============================================================================
// SECTION: Load Guards
// ============================================================================

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    assert_invalid(SyncConfig::load(Some(Path::new(&long_path))), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    assert_invalid(
        SyncConfig::load(Some(Path::new(&long_component))),
        "config path component too long",
    )
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let file = write_config(&vec![b'#'; MAX_CONFIG_FILE_SIZE + 1])?;
    assert_invalid(SyncConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let file = write_config(&[0xFF, 0xFE, 0xFF])?;
    assert_invalid(SyncConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_reports_missing_file_as_io() -> TestResult {
    match SyncConfig::load(Some(Path::new("/nonexistent/cloudlink-sync.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {other:?}")),
    }
}

#[test]
fn load_rejects_malformed_toml() -> TestResult {
    let file = write_config(b"[worker\nqueue_capacity = 1")?;
    assert_invalid(SyncConfig::load(Some(file.path())), "config parse error")
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

#[test]
fn empty_file_yields_defaults() -> TestResult {
    let file = write_config(b"")?;
    let config = SyncConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config != SyncConfig::default() {
        return Err("empty config should equal defaults".to_string());
    }
    let worker = config.worker_config();
    if worker.queue_capacity != 2048 || worker.batch_limits.max_records() != 100 {
        return Err(format!("unexpected worker defaults: {worker:?}"));
    }
    let store = config.store_config();
    if store.path != PathBuf::from("cloudlink-sync.db") || store.journal_mode != SqliteStoreMode::Wal
    {
        return Err(format!("unexpected store defaults: {store:?}"));
    }
    Ok(())
}

#[test]
fn example_config_is_valid() -> TestResult {
    let config = SyncConfig::from_toml(&config_toml_example()).map_err(|err| err.to_string())?;
    let identities = config.node_identities();
    let [identity] = identities.as_slice() else {
        return Err(format!("expected one node, got {}", identities.len()));
    };
    if identity.descriptor.hostname != "edge-01" || identity.remote_node_id.is_some() {
        return Err(format!("unexpected identity: {identity:?}"));
    }
    if identity.descriptor.labels.get("role").map(String::as_str) != Some("edge") {
        return Err("missing role label".to_string());
    }
    Ok(())
}

// ============================================================================
// SECTION: Limits
// ============================================================================

#[test]
fn zero_queue_capacity_is_rejected() -> TestResult {
    assert_invalid(
        SyncConfig::from_toml("[worker]\nqueue_capacity = 0\n"),
        "worker.queue_capacity must be between 1 and",
    )
}

#[test]
fn oversized_batch_count_is_rejected() -> TestResult {
    assert_invalid(
        SyncConfig::from_toml("[worker]\nmax_batch_count = 5000\n"),
        "worker.max_batch_count must be between 1 and",
    )
}

#[test]
fn zero_read_pool_is_rejected() -> TestResult {
    assert_invalid(
        SyncConfig::from_toml("[store]\nread_pool_size = 0\n"),
        "store.read_pool_size must be between 1 and",
    )
}

#[test]
fn empty_store_path_is_rejected() -> TestResult {
    assert_invalid(SyncConfig::from_toml("[store]\npath = \"  \"\n"), "store.path must be non-empty")
}

#[test]
fn unknown_log_level_is_rejected() -> TestResult {
    assert_invalid(SyncConfig::from_toml("[logging]\nlevel = \"loud\"\n"), "logging.level")
}

#[test]
fn duplicate_node_ids_are_rejected() -> TestResult {
    let node = "[[nodes]]\nnode_id = \"6f1c3e0a-5b2d-4c8e-9a47-1d2e3f405162\"\nhostname = \"a\"\n";
    assert_invalid(SyncConfig::from_toml(&format!("{node}{node}")), "duplicate node_id")
}

#[test]
fn blank_hostname_is_rejected() -> TestResult {
    assert_invalid(
        SyncConfig::from_toml(
            "[[nodes]]\nnode_id = \"6f1c3e0a-5b2d-4c8e-9a47-1d2e3f405162\"\nhostname = \" \"\n",
        ),
        "nodes.hostname must be non-empty",
    )
}

#[test]
fn malformed_node_id_is_a_parse_error() -> TestResult {
    assert_invalid(
        SyncConfig::from_toml("[[nodes]]\nnode_id = \"not-a-uuid\"\nhostname = \"a\"\n"),
        "config parse error",
    )
}

#[test]
fn claimed_node_keeps_remote_id() -> TestResult {
    let config = SyncConfig::from_toml(
        "[[nodes]]\nnode_id = \"6f1c3e0a-5b2d-4c8e-9a47-1d2e3f405162\"\nremote_node_id = \
         \"0e7b1c2d-3f4a-4b5c-8d6e-7f8091a2b3c4\"\nhostname = \"a\"\n",
    )
    .map_err(|err| err.to_string())?;
    let identity = &config.node_identities()[0];
    match identity.remote_node_id {
        Some(remote) if remote.to_string() == "0e7b1c2d-3f4a-4b5c-8d6e-7f8091a2b3c4" => Ok(()),
        other => Err(format!("unexpected remote id: {other:?}")),
    }
}
