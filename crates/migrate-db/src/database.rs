use std::path::{Path, PathBuf};
use std::time::Duration;

use migrate_common::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

/// Where a database URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

/// Accepts `sqlite::memory:`, `sqlite://path`, `sqlite:path` and bare paths.
pub fn parse_database_url(url: &str) -> Result<DatabaseLocation> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Config("database url is empty".into()));
    }
    if matches!(url, "sqlite::memory:" | ":memory:" | "sqlite://:memory:") {
        return Ok(DatabaseLocation::Memory);
    }
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.is_empty() {
        return Err(Error::Config(format!("database url has no path: {url}")));
    }
    if path.contains("://") {
        return Err(Error::Config(format!(
            "unsupported database url (only sqlite is supported): {url}"
        )));
    }
    Ok(DatabaseLocation::File(PathBuf::from(path)))
}

pub fn open_database(url: &str, busy_timeout: Duration) -> Result<Connection> {
    match parse_database_url(url)? {
        DatabaseLocation::Memory => open_in_memory(busy_timeout),
        DatabaseLocation::File(path) => open_path(&path, busy_timeout),
    }
}

pub fn open_path(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    // busy timeout first so concurrent openers wait on the WAL switch
    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

pub fn open_in_memory(busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

/// Open for inspection only: nothing is created and no pragma is changed.
///
/// A file that does not exist yet reads as an empty in-memory database.
pub fn open_database_read_only(url: &str, busy_timeout: Duration) -> Result<Connection> {
    let path = match parse_database_url(url)? {
        DatabaseLocation::Memory => return open_in_memory(busy_timeout),
        DatabaseLocation::File(path) => path,
    };
    if !path.exists() {
        debug!("{} does not exist yet, nothing is applied", path.display());
        return open_in_memory(busy_timeout);
    }

    info!("opening database at {} (read-only)", path.display());
    let conn = Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    Ok(conn)
}
