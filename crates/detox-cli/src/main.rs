// crates/detox-cli/src/main.rs
// ============================================================================
// Module: Detox CLI Entry Point
// Description: Command dispatcher for the Detox monitor server and store tasks.
// Purpose: Serve reports and run offline import, cache, and export tasks.
// Dependencies: clap, detox-config, detox-core, detox-store-sqlite, detox-web, tokio
// ============================================================================

//! ## Overview
//! The `detox` binary starts the HTTP server and offers offline tasks over the
//! same snapshot store: importing fact batches, pre-building a cycle's cache,
//! exporting a deletion list, and printing the latest completed cycle. Every
//! command loads configuration the same way the server does. Security
//! posture: input files are untrusted and read with hard size limits.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use detox_config::ConfigError;
use detox_config::DetoxConfig;
use detox_config::config_toml_example;
use detox_core::CycleCatalog;
use detox_core::CycleId;
use detox_core::CycleRequest;
use detox_core::FactBatch;
use detox_core::ResolvedCycle;
use detox_core::SnapshotCache;
use detox_core::StoreError;
use detox_core::resolve_cycle;
use detox_core::runtime::reports;
use detox_store_sqlite::SqliteSnapshotStore;
use detox_web::DetoxServer;
use detox_web::ServerError;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a fact batch accepted by `import`.
const MAX_IMPORT_BYTES: usize = 256 * 1024 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "detox", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP report server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Import a JSON fact batch into the snapshot store.
    Import(ImportCommand),
    /// Snapshot cache utilities.
    Cache {
        /// Selected cache subcommand.
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// Write the tab-separated deletion list of a cycle.
    Dump(DumpCommand),
    /// Print the latest completed cycle number (`0` when none).
    Latest(LatestCommand),
}

/// Config file location shared by every command.
#[derive(Args, Debug, Clone, Default)]
struct ConfigArg {
    /// Config file path (defaults to `DETOX_CONFIG`, then detox.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl ConfigArg {
    /// Loads and validates the configuration.
    fn load(&self) -> CliResult<DetoxConfig> {
        DetoxConfig::load(self.config.as_deref()).map_err(CliError::from)
    }
}

/// Cycle selectors, resolved the same way as HTTP parameters.
#[derive(Args, Debug, Clone, Default)]
struct CycleSelector {
    /// Explicit cycle number.
    #[arg(long, value_name = "N")]
    cycle: Option<u64>,
    /// Partition name.
    #[arg(long, value_name = "NAME")]
    partition: Option<String>,
    /// Partition identifier.
    #[arg(long, value_name = "ID")]
    partition_id: Option<u64>,
}

impl CycleSelector {
    /// Converts the selectors into a resolution request.
    fn request(&self) -> CycleRequest {
        CycleRequest {
            cycle_number: self.cycle,
            partition_id: self.partition_id,
            partition_name: self.partition.clone(),
        }
    }
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Config location.
    #[command(flatten)]
    config: ConfigArg,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a configuration file.
    Validate(ConfigValidateCommand),
    /// Print the canonical example configuration.
    Example,
}

/// Arguments for config validation.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Config location.
    #[command(flatten)]
    config: ConfigArg,
}

/// Arguments for `import`.
#[derive(Args, Debug)]
struct ImportCommand {
    /// Config location.
    #[command(flatten)]
    config: ConfigArg,
    /// Path to the JSON fact batch.
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Build a cycle's snapshot cache if it is not built yet.
    Ensure(CacheEnsureCommand),
}

/// Arguments for `cache ensure`.
#[derive(Args, Debug)]
struct CacheEnsureCommand {
    /// Config location.
    #[command(flatten)]
    config: ConfigArg,
    /// Completed cycle to build.
    #[arg(long, value_name = "N")]
    cycle: u64,
}

/// Arguments for `dump`.
#[derive(Args, Debug)]
struct DumpCommand {
    /// Config location.
    #[command(flatten)]
    config: ConfigArg,
    /// Cycle selectors.
    #[command(flatten)]
    selector: CycleSelector,
    /// Output path (defaults to stdout).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

/// Arguments for `latest`.
#[derive(Args, Debug)]
struct LatestCommand {
    /// Config location.
    #[command(flatten)]
    config: ConfigArg,
    /// Cycle selectors.
    #[command(flatten)]
    selector: CycleSelector,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Snapshot store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// HTTP server failure.
    #[error("server failed: {0}")]
    Server(#[from] ServerError),
    /// Invalid command input.
    #[error("{0}")]
    Input(String),
    /// Writing command output failed.
    #[error("failed to write {stream}: {error}")]
    Output {
        /// Output stream or path label.
        stream: String,
        /// Underlying I/O error.
        error: std::io::Error,
    },
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

/// Errors returned by [`read_bytes_with_limit`].
#[derive(Debug)]
enum ReadLimitError {
    /// File I/O failure.
    Io(std::io::Error),
    /// File size exceeds the configured limit.
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config {
            command,
        } => command_config(&command),
        Commands::Import(command) => command_import(&command),
        Commands::Cache {
            command: CacheCommand::Ensure(command),
        } => command_cache_ensure(&command),
        Commands::Dump(command) => command_dump(&command),
        Commands::Latest(command) => command_latest(&command),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = command.config.load()?;
    let bind = config.server.bind.clone();
    let server = tokio::task::spawn_blocking(move || DetoxServer::from_config(&config))
        .await
        .map_err(|err| CliError::Input(format!("init join failed: {err}")))??;
    write_stderr_line(&format!("detox: serving /detox on {bind}"))
        .map_err(|error| output_error("stderr", error))?;
    server.serve().await?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => {
            command.config.load()?;
            write_stdout_line("config ok").map_err(|error| output_error("stdout", error))?;
        }
        ConfigCommand::Example => {
            write_stdout_bytes(config_toml_example().as_bytes())
                .map_err(|error| output_error("stdout", error))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Store Commands
// ============================================================================

/// Executes the `import` command.
fn command_import(command: &ImportCommand) -> CliResult<ExitCode> {
    let config = command.config.load()?;
    let bytes = read_bytes_with_limit(&command.file, MAX_IMPORT_BYTES)
        .map_err(|err| read_error(&command.file, err))?;
    let batch = FactBatch::from_json_slice(&bytes).map_err(|err| {
        CliError::Input(format!("invalid fact batch {}: {err}", command.file.display()))
    })?;
    let store = open_store(&config)?;
    let summary = store.import_facts(&batch).map_err(StoreError::from)?;
    let rendered = serde_json::to_string_pretty(&summary)
        .map_err(|err| CliError::Input(format!("failed to render import summary: {err}")))?;
    write_stdout_line(&rendered).map_err(|error| output_error("stdout", error))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `cache ensure` command.
fn command_cache_ensure(command: &CacheEnsureCommand) -> CliResult<ExitCode> {
    let config = command.config.load()?;
    let id = CycleId::from_raw(command.cycle)
        .ok_or_else(|| CliError::Input("cycle must be greater than zero".to_string()))?;
    let store = open_store(&config)?;
    let cycle =
        store.cycle(id)?.ok_or_else(|| CliError::Input(format!("cycle {id} not found")))?;
    if !cycle.is_completed() {
        return Err(CliError::Input(format!("cycle {id} is still running")));
    }
    let outcome = store.ensure_cached(cycle.id, cycle.partition_id)?;
    let rows = store.cache_row_count(cycle.id).map_err(StoreError::from)?;
    let state = if outcome.built { "built" } else { "already cached" };
    write_stdout_line(&format!(
        "cycle {id}: {state}, {rows} rows cached, {} inserted",
        outcome.rows_inserted
    ))
    .map_err(|error| output_error("stdout", error))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `dump` command.
fn command_dump(command: &DumpCommand) -> CliResult<ExitCode> {
    let config = command.config.load()?;
    let store = open_store(&config)?;
    let resolved = resolve(&store, &config, &command.selector)?;
    let dump = reports::deletion_dump(&store, &resolved)?;
    match &command.output {
        Some(path) => {
            fs::write(path, dump.report.as_bytes())
                .map_err(|error| output_error(&path.display().to_string(), error))?;
            write_stderr_line(&format!(
                "detox: wrote cycle {} deletion list to {}",
                resolved.cycle_number(),
                path.display()
            ))
            .map_err(|error| output_error("stderr", error))?;
        }
        None => {
            write_stdout_bytes(dump.report.as_bytes())
                .map_err(|error| output_error("stdout", error))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `latest` command.
fn command_latest(command: &LatestCommand) -> CliResult<ExitCode> {
    let config = command.config.load()?;
    let store = open_store(&config)?;
    let defaults = config.report.resolution_defaults()?;
    let resolved = resolve_cycle(&store, &command.selector.request(), &defaults)?;
    let latest = store.latest_completed_cycle(resolved.partition_id, defaults.operation)?;
    write_stdout_line(&latest.map_or(0, |cycle| cycle.id.get()).to_string())
        .map_err(|error| output_error("stdout", error))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens the configured snapshot store.
fn open_store(config: &DetoxConfig) -> CliResult<SqliteSnapshotStore> {
    SqliteSnapshotStore::new(&config.store.sqlite()).map_err(|err| CliError::Store(err.into()))
}

/// Resolves selectors against the store with the configured fallbacks.
fn resolve(
    store: &SqliteSnapshotStore,
    config: &DetoxConfig,
    selector: &CycleSelector,
) -> CliResult<ResolvedCycle> {
    let defaults = config.report.resolution_defaults()?;
    resolve_cycle(store, &selector.request(), &defaults).map_err(CliError::from)
}

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let metadata = file.metadata().map_err(ReadLimitError::Io)?;
    let size = metadata.len();
    let limit = u64::try_from(max_bytes).map_err(|_| ReadLimitError::TooLarge {
        size,
        limit: max_bytes,
    })?;
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let mut limited = file.take(limit.saturating_add(1));
    let mut bytes = Vec::new();
    limited.read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        let actual = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        return Err(ReadLimitError::TooLarge {
            size: actual,
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Formats a bounded read failure.
fn read_error(path: &Path, error: ReadLimitError) -> CliError {
    match error {
        ReadLimitError::Io(err) => {
            CliError::Input(format!("failed to read {}: {err}", path.display()))
        }
        ReadLimitError::TooLarge {
            size,
            limit,
        } => CliError::Input(format!(
            "{} is {size} bytes, larger than the {limit} byte limit",
            path.display()
        )),
    }
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes)?;
    stdout.flush()
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Wraps an output failure.
fn output_error(stream: &str, error: std::io::Error) -> CliError {
    CliError::Output {
        stream: stream.to_string(),
        error,
    }
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(&format!("detox: {message}"));
    ExitCode::FAILURE
}
