mod commands;
mod config;
mod definitions;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use stepwise_sqlite::SqliteStorage;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Stepwise process execution engine.
#[derive(Parser)]
#[command(name = "stepwise", version, about = "Stepwise process execution engine")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// SQLite database file. Without it an in-memory database is used.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Definitions file to load before serving
        #[arg(long)]
        definitions: Option<PathBuf>,
        /// Owner of the preloaded processes
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Load a definitions file into the database
    Seed {
        /// Path to the definitions JSON file
        file: PathBuf,
        /// Owner of the created processes
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Validate a definitions file without touching any database
    Check {
        /// Path to the definitions JSON file
        file: PathBuf,
    },

    /// Print the Argon2id hash of a password
    HashPassword {
        password: String,
    },

    /// Abandon in-progress runs that have been idle too long
    Sweep {
        /// Minimum idle time, in minutes
        #[arg(long, default_value = "1440")]
        idle_minutes: u32,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    let settings = Settings::from_env();

    match cli.command {
        Commands::Check { file } => {
            commands::check::cmd_check(&file, cli.output, cli.quiet);
        }
        Commands::HashPassword { password } => {
            commands::hash_password::cmd_hash_password(&password, &settings, cli.output, cli.quiet);
        }
        Commands::Seed { file, owner } => {
            let rt = runtime(cli.output, cli.quiet);
            let storage = open_storage(cli.db.as_deref(), cli.output, cli.quiet);
            rt.block_on(commands::seed::cmd_seed(
                storage,
                &settings,
                &file,
                &owner,
                cli.output,
                cli.quiet,
            ));
        }
        Commands::Sweep { idle_minutes } => {
            let rt = runtime(cli.output, cli.quiet);
            let storage = open_storage(cli.db.as_deref(), cli.output, cli.quiet);
            rt.block_on(commands::sweep::cmd_sweep(
                storage,
                &settings,
                idle_minutes,
                cli.output,
                cli.quiet,
            ));
        }
        Commands::Serve {
            port,
            definitions,
            owner,
        } => {
            let rt = runtime(cli.output, cli.quiet);
            let storage = open_storage(cli.db.as_deref(), cli.output, cli.quiet);
            let options = serve::ServeOptions {
                port,
                definitions,
                owner,
                settings,
            };
            if let Err(e) = rt.block_on(serve::start_server(storage, options)) {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
    }
}

/// Log filter from `STEPWISE_LOG`, then `RUST_LOG`, then `info` (`warn`
/// with `--quiet`). Logs go to stderr so stdout stays parseable.
fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = std::env::var("STEPWISE_LOG")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

fn open_storage(db: Option<&Path>, output: OutputFormat, quiet: bool) -> SqliteStorage {
    let opened = match db {
        Some(path) => SqliteStorage::open(path),
        None => SqliteStorage::open_in_memory(),
    };
    match opened {
        Ok(storage) => storage,
        Err(e) => {
            let target = db.map_or_else(|| "in-memory database".to_string(), |p| p.display().to_string());
            report_error(&format!("cannot open {}: {}", target, e), output, quiet);
            process::exit(1);
        }
    }
}

/// Report an error in the requested output format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Print a serializable value as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization error: {}\"}}", e));
    println!("{}", pretty);
}
