use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://migrate.db";
pub const DEFAULT_TABLE: &str = "_migrations";

/// Top-level configuration, read from `migrate.yml` / `migrate.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://path`, `sqlite:path`, `sqlite::memory:` or a bare path.
    pub url: String,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
    /// Bookkeeping table holding applied versions.
    pub table: String,
    pub statement_timeout_secs: Option<u64>,
    pub claim_retries: u32,
    pub claim_backoff_ms: u64,
    pub verify_checksums: bool,
    pub version_scheme: VersionScheme,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
            table: DEFAULT_TABLE.to_string(),
            statement_timeout_secs: None,
            claim_retries: 3,
            claim_backoff_ms: 250,
            verify_checksums: true,
            version_scheme: VersionScheme::default(),
        }
    }
}

impl MigrationsConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }

    pub fn claim_backoff(&self) -> Duration {
        Duration::from_millis(self.claim_backoff_ms)
    }
}

/// How `migrate new` numbers freshly scaffolded files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// Next integer after the highest existing version, zero-padded to four digits.
    #[default]
    Sequential,
    /// UTC `YYYYMMDDHHMMSS`.
    Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
