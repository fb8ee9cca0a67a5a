mod commands;
mod report;
mod scaffold;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use migrate_common::Version;
use migrate_config::{AppConfig, ConfigLoader, LogFormat};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "migrate",
    version,
    about = "Apply ordered SQL migrations to a SQLite database"
)]
struct Cli {
    /// Config file (defaults to migrate.yml / migrate.yaml / migrate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, e.g. sqlite://dispatch.db
    #[arg(long, global = true, env = "DATABASE_URL")]
    database: Option<String>,

    /// Directory holding <version>_<name>.sql files
    #[arg(long, global = true, env = "MIGRATE_DIR")]
    dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Apply all pending migrations in version order
    Up {
        /// Stop after applying this version
        #[arg(long)]
        to: Option<Version>,
        /// Print the plan without executing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Check migration files and applied checksums without applying anything
    Validate,
    /// Create the next migration file
    New {
        /// Short description, used in the file name
        name: String,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (config, source) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config, cli.verbose);
    match &source {
        Some(path) => info!("loaded config from {}", path.display()),
        None => debug!("no config file found, using defaults"),
    }

    match commands::run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Effective config plus the file it came from. Runs before tracing is
/// installed, so the caller logs the source.
fn load_config(cli: &Cli) -> Result<(AppConfig, Option<PathBuf>)> {
    let loader = ConfigLoader::new(cli.config.clone());
    let source = loader.config_path()?;
    let mut config = loader.load().context("failed to load configuration")?;

    if let Some(url) = &cli.database {
        config.database.url = url.clone();
    }
    if let Some(dir) = &cli.dir {
        config.migrations.dir = dir.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = match format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        };
    }
    migrate_config::loader::validate(&config)?;
    Ok((config, source))
}

/// Logs go to stderr so stdout stays clean for tables and JSON.
fn init_tracing(config: &AppConfig, verbose: u8) {
    let level = match verbose {
        0 => config.log.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
