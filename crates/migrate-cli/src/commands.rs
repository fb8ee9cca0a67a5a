use std::process::ExitCode;

use anyhow::{Context, Result};
use migrate_common::Version;
use migrate_config::AppConfig;
use migrate_db::{Migrator, Registry, RunOptions, Tracker, open_database, open_database_read_only};
use rusqlite::Connection;
use tracing::info;

use crate::Command;
use crate::{report, scaffold};

pub fn run(command: Command, config: &AppConfig) -> Result<ExitCode> {
    match command {
        Command::Up { to, dry_run } => up(config, to, dry_run),
        Command::Status { json } => status(config, json),
        Command::Validate => validate(config),
        Command::New { name } => new(config, &name),
    }
}

pub fn run_options(config: &AppConfig) -> RunOptions {
    RunOptions {
        statement_timeout: config.migrations.statement_timeout(),
        claim_retries: config.migrations.claim_retries,
        claim_backoff: config.migrations.claim_backoff(),
        verify_checksums: config.migrations.verify_checksums,
    }
}

/// Registry, connection and tracker for the configured database.
pub fn open_migrator(config: &AppConfig) -> Result<Migrator> {
    let conn = open_database(&config.database.url, config.database.busy_timeout())?;
    build_migrator(config, conn)
}

/// Like [`open_migrator`], for commands that must not write to the database.
pub fn inspect_migrator(config: &AppConfig) -> Result<Migrator> {
    let conn = open_database_read_only(&config.database.url, config.database.busy_timeout())?;
    build_migrator(config, conn)
}

fn build_migrator(config: &AppConfig, conn: Connection) -> Result<Migrator> {
    let dir = &config.migrations.dir;
    let registry = Registry::from_dir(dir)
        .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
    info!("{} migration(s) registered from {}", registry.len(), dir.display());

    let tracker = Tracker::new(config.migrations.table.as_str())?;
    Ok(Migrator::new(conn, registry, tracker).with_options(run_options(config)))
}

fn up(config: &AppConfig, to: Option<Version>, dry_run: bool) -> Result<ExitCode> {
    if dry_run {
        let plan = inspect_migrator(config)?.plan(to)?;
        print!("{}", report::plan_summary(&plan));
        return Ok(ExitCode::SUCCESS);
    }

    let mut migrator = open_migrator(config)?;
    let run = migrator.up(to)?;
    print!("{}", report::run_summary(&run));
    match &run.failure {
        Some(failure) => {
            eprintln!("error: {}", failure.error);
            eprintln!(
                "halted at migration {} ({}); later migrations were not attempted",
                failure.version, failure.name
            );
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn status(config: &AppConfig, json: bool) -> Result<ExitCode> {
    let migrator = inspect_migrator(config)?;
    let statuses = migrator.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print!("{}", report::status_table(&statuses));
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(config: &AppConfig) -> Result<ExitCode> {
    let migrator = inspect_migrator(config)?;
    let issues = migrator.validate()?;
    if issues.is_empty() {
        let applied = migrator.applied()?.len();
        println!(
            "ok: {} migration(s), {applied} applied",
            migrator.registry().len()
        );
        return Ok(ExitCode::SUCCESS);
    }
    for issue in &issues {
        eprintln!("error: {issue}");
    }
    Ok(ExitCode::FAILURE)
}

fn new(config: &AppConfig, name: &str) -> Result<ExitCode> {
    let path = scaffold::create(
        &config.migrations.dir,
        config.migrations.version_scheme,
        name,
        chrono::Utc::now(),
    )?;
    println!("created {}", path.display());
    Ok(ExitCode::SUCCESS)
}
