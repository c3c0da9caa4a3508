// crates/cloudlink-cli/src/main.rs
// ============================================================================
// Module: Cloudlink Sync CLI Entry Point
// Description: Command dispatcher for the cloudlink sync agent.
// Purpose: Run node workers, stage records, inspect streams and config trees.
// Dependencies: clap, cloudlink-core, cloudlink-config, cloudlink-store-sqlite,
// cloudlink-dyncfg, serde_json, thiserror, tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! `cloudlink-sync` loads a validated agent config, opens the durable SQLite
//! staging store and drives one worker per configured node. Outbound messages
//! are written to stdout as JSON lines; logs go to stderr. Security posture:
//! config files and tree inputs are untrusted and read with size limits.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use cloudlink_cli::SpoolPublisher;
use cloudlink_config::MAX_CONFIG_FILE_SIZE;
use cloudlink_config::SyncConfig;
use cloudlink_config::config_toml_example;
use cloudlink_core::Command;
use cloudlink_core::EntityId;
use cloudlink_core::NodeId;
use cloudlink_core::NodeRegistry;
use cloudlink_core::StageRequest;
use cloudlink_core::StagingStore;
use cloudlink_core::Stream;
use cloudlink_core::SystemClock;
use cloudlink_dyncfg::DyncfgNode;
use cloudlink_dyncfg::DyncfgRegistry;
use cloudlink_dyncfg::StaticFunctions;
use cloudlink_dyncfg::execute_config_function;
use cloudlink_store_sqlite::SqliteStagingStore;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default interval between housekeeping ticks.
const DEFAULT_TICK_MS: u64 = 1_000;
/// Maximum payload file size accepted by `stage`.
const MAX_PAYLOAD_FILE_SIZE: usize = 4 * 1024 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Cloudlink sync agent.
#[derive(Parser, Debug)]
#[command(name = "cloudlink-sync", version, about = "Cloudlink metadata sync agent")]
struct Cli {
    /// Optional config file path (defaults to cloudlink-sync.toml or env override).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Log filter overriding `[logging] level`.
    #[arg(long, value_name = "FILTER", global = true)]
    log_level: Option<String>,
    /// Selected command.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every configured node and drive housekeeping ticks.
    Run(RunCommand),
    /// Stage one chart, dimension or alert record and wait for it.
    Stage(StageCommand),
    /// Print stream status for configured nodes.
    Status(StatusCommand),
    /// Render a configuration tree through the `config` function.
    Tree(TreeCommand),
    /// Config utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Stop after this many ticks; runs until killed when omitted.
    #[arg(long, value_name = "N")]
    ticks: Option<u64>,
    /// Milliseconds between ticks.
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,
}

/// Entity kinds accepted by `stage`.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum EntityKind {
    /// Chart definition.
    Chart,
    /// Dimension definition.
    Dimension,
    /// Alert transition.
    Alert,
}

/// Arguments for `stage`.
#[derive(Args, Debug)]
struct StageCommand {
    /// Local node id.
    #[arg(long, value_name = "UUID")]
    node: NodeId,
    /// Entity kind.
    #[arg(long, value_enum)]
    kind: EntityKind,
    /// Entity id.
    #[arg(long, value_name = "UUID")]
    entity: EntityId,
    /// Claim id the record was produced under.
    #[arg(long, value_name = "ID")]
    claim_id: Option<String>,
    /// File holding the serialized payload.
    #[arg(long, value_name = "PATH")]
    payload_file: PathBuf,
}

/// Arguments for `status`.
#[derive(Args, Debug)]
struct StatusCommand {
    /// Restrict output to one node.
    #[arg(long, value_name = "UUID")]
    node: Option<NodeId>,
}

/// Arguments for `tree`.
#[derive(Args, Debug)]
struct TreeCommand {
    /// Host whose tree is rendered.
    #[arg(long, value_name = "UUID")]
    host: NodeId,
    /// JSON file mapping config ids to nodes.
    #[arg(long, value_name = "PATH")]
    nodes: PathBuf,
    /// Root path of the rendered tree.
    #[arg(long, default_value = "/")]
    path: String,
    /// Restrict the tree to one config id.
    #[arg(long, value_name = "ID")]
    id: Option<String>,
    /// Function names currently served; every referenced function when omitted.
    #[arg(long = "available", value_name = "NAME")]
    available: Vec<String>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the config file.
    Validate,
    /// Print an example config.
    Example,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Example,
        } => {
            write_stdout_line(config_toml_example().trim_end())
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            command: ConfigCommand::Validate,
        } => {
            let config = load_config(cli.config.as_deref())?;
            write_stdout_line(&format!("config valid: {} node(s)", config.nodes.len()))
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tree(command) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"))?;
            command_tree(&command)
        }
        Commands::Run(command) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level))?;
            command_run(&config, &command)
        }
        Commands::Stage(command) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level))?;
            command_stage(&config, command)
        }
        Commands::Status(command) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level))?;
            command_status(&config, &command)
        }
    }
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Loads and validates the agent config.
fn load_config(path: Option<&Path>) -> CliResult<SyncConfig> {
    SyncConfig::load(path).map_err(|err| CliError::new(format!("config load failed: {err}")))
}

/// Installs the stderr tracing subscriber.
fn init_logging(filter: &str) -> CliResult<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|err| CliError::new(format!("invalid log filter: {err}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| CliError::new(format!("logging init failed: {err}")))
}

/// Opens the configured staging store.
fn open_store(config: &SyncConfig) -> CliResult<SqliteStagingStore> {
    SqliteStagingStore::new(&config.store_config())
        .map_err(|err| CliError::new(format!("store open failed: {err}")))
}

/// Builds a registry publishing to stdout and registers the selected nodes.
fn start_registry(config: &SyncConfig, only: Option<&NodeId>) -> CliResult<NodeRegistry> {
    let store = open_store(config)?;
    let registry = NodeRegistry::new(
        Arc::new(store),
        Arc::new(SpoolPublisher::new(std::io::stdout())),
        Arc::new(SystemClock),
        config.worker_config(),
    );
    let mut started = 0_usize;
    for identity in config.node_identities() {
        if only.is_some_and(|node_id| *node_id != identity.node_id) {
            continue;
        }
        registry
            .add_node(identity)
            .map_err(|err| CliError::new(format!("node start failed: {err}")))?;
        started += 1;
    }
    if let Some(node_id) = only
        && started == 0
    {
        return Err(CliError::new(format!("node {node_id} is not configured")));
    }
    Ok(registry)
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs every configured node until the tick budget is spent.
fn command_run(config: &SyncConfig, command: &RunCommand) -> CliResult<ExitCode> {
    let registry = start_registry(config, None)?;
    info!(nodes = config.nodes.len(), tick_ms = command.tick_ms, "sync agent started");
    let interval = Duration::from_millis(command.tick_ms);
    let mut ticks = 0_u64;
    while command.ticks.is_none_or(|limit| ticks < limit) {
        thread::sleep(interval);
        if let Err(err) = registry.tick_all() {
            warn!(error = %err, "tick failed");
        }
        ticks += 1;
    }
    registry.shutdown().map_err(|err| CliError::new(format!("shutdown failed: {err}")))?;
    info!(ticks = ticks, "sync agent stopped");
    Ok(ExitCode::SUCCESS)
}

/// Stages one record through the node worker.
fn command_stage(config: &SyncConfig, command: StageCommand) -> CliResult<ExitCode> {
    let payload = read_bytes_with_limit(&command.payload_file, MAX_PAYLOAD_FILE_SIZE)?;
    let registry = start_registry(config, Some(&command.node))?;
    let request = StageRequest {
        entity_id: command.entity,
        claim_id: command.claim_id,
        payload,
    };
    let staged = match command.kind {
        EntityKind::Chart => Command::AddChart(request),
        EntityKind::Dimension => Command::AddDimension(request),
        EntityKind::Alert => Command::AddAlert(request),
    };
    let outcome = registry
        .submit_and_wait(&command.node, staged)
        .map_err(|err| CliError::new(format!("stage failed: {err}")))?;
    registry.shutdown().map_err(|err| CliError::new(format!("shutdown failed: {err}")))?;
    write_json_line(&json!({ "node_id": command.node, "result": outcome }))?;
    Ok(if outcome.is_completed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Prints chart and alert stream status.
fn command_status(config: &SyncConfig, command: &StatusCommand) -> CliResult<ExitCode> {
    let store = open_store(config)?;
    for identity in config.node_identities() {
        if command.node.is_some_and(|node_id| node_id != identity.node_id) {
            continue;
        }
        let exists = store
            .node_exists(&identity.node_id)
            .map_err(|err| CliError::new(format!("status failed: {err}")))?;
        if !exists {
            write_json_line(&json!({ "node_id": identity.node_id, "staged": false }))?;
            continue;
        }
        let mut streams = BTreeMap::new();
        for stream in Stream::ALL {
            let status = store
                .status(&identity.node_id, stream)
                .map_err(|err| CliError::new(format!("status failed: {err}")))?;
            streams.insert(stream.as_str(), status);
        }
        write_json_line(&json!({
            "node_id": identity.node_id,
            "staged": true,
            "streams": streams,
        }))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Renders a configuration tree from a JSON node file.
fn command_tree(command: &TreeCommand) -> CliResult<ExitCode> {
    let bytes = read_bytes_with_limit(&command.nodes, MAX_CONFIG_FILE_SIZE)?;
    let nodes: BTreeMap<String, DyncfgNode> = serde_json::from_slice(&bytes)
        .map_err(|err| CliError::new(format!("invalid node file: {err}")))?;
    let functions = if command.available.is_empty() {
        StaticFunctions::new(
            nodes.values().map(|node| node.function.clone()).collect::<BTreeSet<_>>(),
        )
    } else {
        StaticFunctions::new(command.available.iter().cloned())
    };
    let registry = DyncfgRegistry::new();
    for (id, node) in nodes {
        registry
            .upsert(&id, node)
            .map_err(|err| CliError::new(format!("node {id} rejected: {err}")))?;
    }

    let mut words = vec!["config", "tree", command.path.as_str()];
    if let Some(id) = &command.id {
        words.push(id.as_str());
    }
    let line = shell_words::join(words);
    let response = execute_config_function(&registry, &command.host, &line, &functions);
    write_json_line(&response.body)?;
    Ok(if response.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ============================================================================
// SECTION: Input
// ============================================================================

/// Reads a file, failing when it exceeds `max_bytes`.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> CliResult<Vec<u8>> {
    let display = path.display();
    let file =
        File::open(path).map_err(|err| CliError::new(format!("open {display} failed: {err}")))?;
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| CliError::new(format!("read {display} failed: {err}")))?;
    if bytes.len() > max_bytes {
        return Err(CliError::new(format!("{display} exceeds {max_bytes} bytes")));
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Serializes a JSON value as one stdout line.
fn write_json_line(value: &serde_json::Value) -> CliResult<()> {
    let line = serde_json::to_string(value)
        .map_err(|err| CliError::new(format!("serialize failed: {err}")))?;
    write_stdout_line(&line).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output stream failure.
fn output_error(stream: &str, err: &std::io::Error) -> String {
    format!("failed to write {stream}: {err}")
}

/// Writes an error to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
