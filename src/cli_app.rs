//! Top-level CLI definition and dispatch.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use symbol_sweep::core::config::Config;
use symbol_sweep::core::errors::SweepError;
use symbol_sweep::core::format::{format_count, format_size, time_since, unix_now};
use symbol_sweep::core::settings::{Settings, SettingsStore};
use symbol_sweep::daemon::bridge::{CacheCommands, CacheService};
use symbol_sweep::daemon::loop_main::MonitoringDaemon;
use symbol_sweep::daemon::signals::SignalHandler;
use symbol_sweep::logger::audit::AuditLog;
use symbol_sweep::logger::dual::{DualLoggerConfig, spawn_logger};
use symbol_sweep::logger::sqlite::SqliteLogger;
use symbol_sweep::logger::stats::{StatsEngine, WindowStats, window_label};
use symbol_sweep::monitor::classifier::CacheState;
use symbol_sweep::monitor::status::{CacheStatus, StatusSnapshot};
use symbol_sweep::scanner::deletion::CleanResult;

/// SymbolSweep keeps the coresymbolicationd cache in check.
#[derive(Debug, Parser)]
#[command(
    name = "symsweep",
    author,
    version,
    about = "SymbolSweep - symbol cache monitor and cleaner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the monitoring daemon in the foreground.
    Daemon(DaemonArgs),
    /// Show the cache size and state.
    Status(StatusArgs),
    /// Delete the cache contents.
    Clean(CleanArgs),
    /// Show when the cache was last cleaned.
    LastClean,
    /// View and edit user settings.
    Settings(SettingsArgs),
    /// Show clean history and size statistics.
    History(HistoryArgs),
    /// Show the tail of the deletions log.
    Log(LogArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Run a single monitor cycle and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct StatusArgs {
    /// Read the status last written by the daemon instead of scanning.
    #[arg(long)]
    cached: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct CleanArgs {
    /// List what would be deleted without deleting anything.
    #[arg(long)]
    dry_run: bool,
    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    yes: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct SettingsArgs {
    #[command(subcommand)]
    command: Option<SettingsCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum SettingsCommand {
    /// Print every setting.
    Show,
    /// Print the settings file location.
    Path,
    /// Change one setting.
    Set(SettingsSetArgs),
    /// Restore defaults (the last clean time is kept).
    Reset,
}

#[derive(Debug, Clone, Args)]
struct SettingsSetArgs {
    /// Setting name, e.g. `auto_clean_threshold`.
    key: String,
    /// New value: `true`/`false` or a non-negative integer.
    value: String,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Number of recent cleans to list.
    #[arg(long, default_value_t = 10)]
    limit: u32,
}

impl Default for HistoryArgs {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

#[derive(Debug, Clone, Args)]
struct LogArgs {
    /// Number of lines to show.
    #[arg(long, short = 'n', default_value_t = 40)]
    lines: usize,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file location.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include build metadata.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<SweepError> for CliError {
    fn from(e: SweepError) -> Self {
        match e {
            SweepError::InvalidConfig { .. }
            | SweepError::MissingConfig { .. }
            | SweepError::ConfigParse { .. }
            | SweepError::InvalidSettings { .. }
            | SweepError::CleanInProgress => Self::User(e.to_string()),
            SweepError::Serialization { .. } => Self::Internal(e.to_string()),
            _ => Self::Runtime(e.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Clean(args) => run_clean(cli, args),
        Command::LastClean => run_last_clean(cli),
        Command::Settings(args) => run_settings(cli, args),
        Command::History(args) => run_history(cli, args),
        Command::Log(args) => run_log(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

// ──────────────────── daemon ────────────────────

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = MonitoringDaemon::init(config)?;

    let signals = if args.once {
        let signals = SignalHandler::unregistered();
        signals.request_shutdown();
        signals
    } else {
        SignalHandler::new()
    };
    daemon.run(&signals)?;

    if args.once {
        let status = daemon.monitor().last_status();
        match output_mode(cli) {
            OutputMode::Human => {
                if let Some(status) = &status {
                    print_status_human(status, None);
                }
            }
            OutputMode::Json => {
                let payload = json!({
                    "command": "daemon",
                    "once": true,
                    "status": status,
                });
                write_json_line(&payload)?;
            }
        }
    }
    Ok(())
}

// ──────────────────── status ────────────────────

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;

    let (status, source, updated_at) = if args.cached {
        let Some(snapshot) = StatusSnapshot::read(&config.paths.status_file)? else {
            return Err(CliError::User(format!(
                "no cached status at {}; is the daemon running?",
                config.paths.status_file.display()
            )));
        };
        (snapshot.status, "cached", Some(snapshot.updated_at))
    } else {
        let service = CacheService::new(config.clone(), None);
        (service.get_status(), "scan", None)
    };

    let settings = SettingsStore::open(&config.paths.settings_file).load();
    let last_clean = time_since(settings.last_clean_timestamp, unix_now());

    match output_mode(cli) {
        OutputMode::Human => {
            print_status_human(&status, updated_at.as_deref());
            println!("  Last clean: {last_clean}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "source": source,
                "updated_at": updated_at,
                "status": status,
                "formatted_size": status.formatted_size(),
                "last_clean": last_clean,
                "last_clean_timestamp": settings.last_clean_timestamp,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_status_human(status: &CacheStatus, updated_at: Option<&str>) {
    println!(
        "Symbol cache: {} [{}]",
        status.formatted_size().bold(),
        colored_state(status.state)
    );
    println!("  Path:       {}", status.target_path);
    if status.exists {
        println!("  Items:      {}", format_count(u64::from(status.item_count)));
    } else {
        println!("  Items:      {}", "(directory does not exist)".dimmed());
    }
    if let Some(free) = status.volume_free_bytes {
        println!("  Volume free: {}", format_size(free));
    }
    if status.simulated {
        println!("  {}", "debug mode: size is simulated".yellow());
    }
    if let Some(updated_at) = updated_at {
        println!("  Updated:    {updated_at}");
    }
}

fn colored_state(state: CacheState) -> colored::ColoredString {
    match state {
        CacheState::Normal => state.as_str().green(),
        CacheState::Warning => state.as_str().yellow(),
        CacheState::Critical => state.as_str().red().bold(),
    }
}

// ──────────────────── clean ────────────────────

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mode = output_mode(cli);

    let logger = match spawn_logger(DualLoggerConfig::from_config(&config)) {
        Ok(pair) => Some(pair),
        Err(e) => {
            eprintln!("[SSW-CLEAN] activity logging disabled: {e}");
            None
        }
    };
    let service = CacheService::new(config, logger.as_ref().map(|(h, _)| h.clone()));

    let outcome = clean_with_confirmation(&service, args, mode);

    if let Some((handle, join)) = logger {
        handle.shutdown();
        let _ = join.join();
    }
    let Some(result) = outcome? else {
        return Ok(());
    };

    match mode {
        OutputMode::Human => print_clean_human(&result),
        OutputMode::Json => {
            let payload = json!({
                "command": "clean",
                "result": result,
            });
            write_json_line(&payload)?;
        }
    }

    if !result.success {
        return Err(CliError::Runtime(result.message));
    }
    if !result.failures.is_empty() {
        return Err(CliError::Partial(result.message));
    }
    Ok(())
}

/// `Ok(None)` when the user declined.
fn clean_with_confirmation(
    service: &CacheService,
    args: &CleanArgs,
    mode: OutputMode,
) -> Result<Option<CleanResult>, CliError> {
    if !args.dry_run && !args.yes {
        if !io::stdin().is_terminal() {
            return Err(CliError::User(
                "refusing to clean without confirmation; pass --yes or use --dry-run".to_string(),
            ));
        }
        let preview = service.clean(true)?;
        if preview.items_found.is_empty() {
            if mode == OutputMode::Human {
                println!("{}", preview.message);
            }
            return Ok(Some(preview));
        }
        let first = !service.get_settings().first_clean_confirmed;
        if first {
            println!(
                "{}",
                "Cleaning removes cached debug symbols; they are rebuilt on demand.".yellow()
            );
        }
        if !confirm(&format!(
            "Delete {} ({} items) from {}?",
            format_size(preview.bytes_freed),
            preview.items_found.len(),
            service.config().target.path.display()
        ))? {
            println!("Aborted.");
            return Ok(None);
        }
        if first {
            service
                .settings_store()
                .update(|s| s.first_clean_confirmed = true)?;
        }
    }
    Ok(Some(service.clean(args.dry_run)?))
}

fn confirm(question: &str) -> Result<bool, CliError> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn print_clean_human(result: &CleanResult) {
    if result.was_dry_run {
        for item in &result.items_found {
            let kind = if item.is_directory { "dir " } else { "file" };
            println!(
                "  {kind}  {:>10}  {}",
                format_size(item.size_bytes),
                item.name()
            );
        }
    }
    for failure in &result.failures {
        println!(
            "  {} {} [{}] {}",
            "failed:".red(),
            failure.path,
            failure.error_code,
            failure.message
        );
    }
    let line = if result.success && result.failures.is_empty() {
        result.message.green()
    } else if result.success {
        result.message.yellow()
    } else {
        result.message.red()
    };
    println!("{line}");
}

// ──────────────────── last-clean ────────────────────

fn run_last_clean(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let settings = SettingsStore::open(&config.paths.settings_file).load();
    let relative = time_since(settings.last_clean_timestamp, unix_now());

    match output_mode(cli) {
        OutputMode::Human => println!("{relative}"),
        OutputMode::Json => {
            let payload = json!({
                "command": "last-clean",
                "last_clean": relative,
                "last_clean_timestamp": settings.last_clean_timestamp,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── settings ────────────────────

fn run_settings(cli: &Cli, args: &SettingsArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = SettingsStore::open(&config.paths.settings_file);

    match &args.command {
        None | Some(SettingsCommand::Show) => emit_settings(cli, "settings show", &store.load()),
        Some(SettingsCommand::Path) => {
            let path = store.path();
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "settings path",
                        "path": path.to_string_lossy(),
                        "exists": path.exists(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(SettingsCommand::Set(set)) => {
            let committed = store.try_update(|s| s.set_field(&set.key, &set.value))?;
            emit_settings(cli, "settings set", &committed)
        }
        Some(SettingsCommand::Reset) => {
            let committed = store.update(|s| {
                *s = Settings {
                    last_clean_timestamp: s.last_clean_timestamp,
                    ..Settings::default()
                };
            })?;
            emit_settings(cli, "settings reset", &committed)
        }
    }
}

fn emit_settings(cli: &Cli, command: &str, settings: &Settings) -> Result<(), CliError> {
    let value = serde_json::to_value(settings)?;
    match output_mode(cli) {
        OutputMode::Human => {
            if let Value::Object(map) = &value {
                for (key, v) in map {
                    println!("{key:<26} {v}");
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "settings": value,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── history ────────────────────

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;

    if !config.paths.sqlite_db.exists() {
        match output_mode(cli) {
            OutputMode::Human => {
                println!(
                    "No activity database found at {}.",
                    config.paths.sqlite_db.display()
                );
                println!("  Run the daemon or a clean to start collecting history.");
            }
            OutputMode::Json => {
                let payload = json!({
                    "command": "history",
                    "error": "no_database",
                    "db_path": config.paths.sqlite_db.to_string_lossy(),
                });
                write_json_line(&payload)?;
            }
        }
        return Ok(());
    }

    let db = SqliteLogger::open(&config.paths.sqlite_db)
        .map_err(|e| CliError::Runtime(format!("open activity database: {e}")))?;
    let cleans = db.recent_cleans(args.limit)?;
    let engine = StatsEngine::new(&db);

    if output_mode(cli) == OutputMode::Json {
        let rows: Vec<Value> = cleans
            .iter()
            .map(|c| {
                json!({
                    "timestamp": c.timestamp,
                    "trigger": c.trigger,
                    "dry_run": c.dry_run,
                    "success": c.success,
                    "bytes_freed": c.bytes_freed,
                    "items_removed": c.items_removed,
                    "items_failed": c.items_failed,
                    "duration_ms": c.duration_ms,
                    "message": c.message,
                })
            })
            .collect();
        let payload = json!({
            "command": "history",
            "cleans": rows,
            "stats": engine.export_json()?,
        });
        return write_json_line(&payload);
    }

    println!("Recent cleans:");
    if cleans.is_empty() {
        println!("  (none)");
    }
    for c in &cleans {
        let kind = if c.dry_run { "dry-run" } else { "clean" };
        let bytes = u64::try_from(c.bytes_freed).unwrap_or(0);
        let when = &c.timestamp[..19.min(c.timestamp.len())];
        let line = format!(
            "  {when}  {kind:<7}  {:<9}  {:>10}  {}",
            c.trigger,
            format_size(bytes),
            c.message
        );
        if c.success {
            println!("{line}");
        } else {
            println!("{}", line.red());
        }
    }
    println!();

    for ws in &engine.summary()? {
        println!("── {} ──", window_label(ws.window));
        print_window_stats_human(ws);
    }
    Ok(())
}

fn print_window_stats_human(ws: &WindowStats) {
    println!(
        "  Cleans:      {} ({} automatic, {} dry runs)",
        ws.cleans.count, ws.cleans.automatic, ws.cleans.dry_runs
    );
    if ws.cleans.items_removed > 0 {
        println!("  Items:       {}", format_count(ws.cleans.items_removed));
    }
    println!("  Bytes freed: {}", format_size(ws.cleans.bytes_freed));
    if ws.cleans.item_failures > 0 {
        println!("  Failures:    {}", ws.cleans.item_failures);
    }
    if ws.size.samples > 0 {
        println!("  Peak size:   {}", format_size(ws.size.peak_bytes));
        println!(
            "  Worst state: {} ({} transitions)",
            colored_state(ws.size.worst_state),
            ws.size.transitions
        );
    }
}

// ──────────────────── log ────────────────────

fn run_log(cli: &Cli, args: &LogArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let audit = AuditLog::new(&config.paths.audit_log);
    let lines = audit.tail(args.lines)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if lines.is_empty() {
                println!("(no deletions logged at {})", audit.path().display());
            }
            for line in &lines {
                println!("{line}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "log",
                "path": audit.path().to_string_lossy(),
                "lines": lines,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Target: {}", config.target.path.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── version / output helpers ────────────────────

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    let features: Vec<&str> = [
        ("daemon", cfg!(feature = "daemon")),
        ("sqlite", cfg!(feature = "sqlite")),
    ]
    .into_iter()
    .filter_map(|(name, on)| on.then_some(name))
    .collect();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("symsweep {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
                println!("features: {}", features.join(","));
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "symsweep",
                "version": version,
                "package": package,
                "features": features,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SSW_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
