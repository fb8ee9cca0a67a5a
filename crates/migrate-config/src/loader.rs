use std::path::{Path, PathBuf};

use migrate_common::{Error, Result, is_plain_identifier};

use crate::model::AppConfig;

/// File names tried, in order, when no explicit config path is given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["migrate.yml", "migrate.yaml", "migrate.toml"];

/// Resolves the effective `AppConfig`: file, then environment overrides.
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
    search_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            search_dir: PathBuf::from("."),
        }
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    /// Load using the process environment for overrides.
    pub fn load(&self) -> Result<AppConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(&self, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.config_path()? {
            Some(path) => parse_config_file(&path)?,
            None => AppConfig::default(),
        };
        apply_env_overrides(&mut config, lookup);
        validate(&config)?;
        Ok(config)
    }

    /// The file `load` reads, or `None` when defaults apply.
    pub fn config_path(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }
        Ok(DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| self.search_dir.join(name))
            .find(|p| p.is_file()))
    }
}

pub fn parse_config_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

/// `DATABASE_URL`, `MIGRATE_DIR` and `MIGRATE_TABLE` win over file values.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(dir) = non_empty("MIGRATE_DIR") {
        config.migrations.dir = PathBuf::from(dir);
    }
    if let Some(table) = non_empty("MIGRATE_TABLE") {
        config.migrations.table = table;
    }
}

pub fn validate(config: &AppConfig) -> Result<()> {
    if config.database.url.trim().is_empty() {
        return Err(Error::Config("database.url cannot be empty".into()));
    }
    if !is_plain_identifier(&config.migrations.table) {
        return Err(Error::Config(format!(
            "migrations.table must be a plain SQL identifier, got {:?}",
            config.migrations.table
        )));
    }
    if config.migrations.statement_timeout_secs == Some(0) {
        return Err(Error::Config(
            "migrations.statement_timeout_secs must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogFormat;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn falls_back_to_defaults_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new(None)
            .with_search_dir(dir.path())
            .load_with_env(no_env)
            .unwrap();
        assert_eq!(config.migrations.table, "_migrations");
    }

    #[test]
    fn discovers_yaml_in_search_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("migrate.yml"),
            "database:\n  url: sqlite://dispatch.db\nlog:\n  format: json\n",
        )
        .unwrap();

        let config = ConfigLoader::new(None)
            .with_search_dir(dir.path())
            .load_with_env(no_env)
            .unwrap();
        assert_eq!(config.database.url, "sqlite://dispatch.db");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn config_path_reports_the_file_that_load_reads() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(None).with_search_dir(dir.path());
        assert_eq!(loader.config_path().unwrap(), None);

        std::fs::write(dir.path().join("migrate.toml"), "[log]\nlevel = \"debug\"\n").unwrap();
        std::fs::write(dir.path().join("migrate.yaml"), "log:\n  level: warn\n").unwrap();
        assert_eq!(
            loader.config_path().unwrap(),
            Some(dir.path().join("migrate.yaml"))
        );
        assert_eq!(loader.load_with_env(no_env).unwrap().log.level, "warn");
    }

    #[test]
    fn reads_explicit_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[migrations]\ndir = \"sql\"\ntable = \"schema_history\"\nclaim_retries = 5\n",
        )
        .unwrap();

        let config = ConfigLoader::new(Some(path)).load_with_env(no_env).unwrap();
        assert_eq!(config.migrations.dir, PathBuf::from("sql"));
        assert_eq!(config.migrations.table, "schema_history");
        assert_eq!(config.migrations.claim_retries, 5);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = ConfigLoader::new(Some(PathBuf::from("/nonexistent/migrate.yml")))
            .load_with_env(no_env)
            .unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = parse_config_file(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config extension: ini"));
    }

    #[test]
    fn env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("migrate.yml"),
            "database:\n  url: sqlite://file.db\n",
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite://env.db"),
            ("MIGRATE_DIR", "db/migrations"),
            ("MIGRATE_TABLE", ""),
        ]
        .into_iter()
        .collect();

        let config = ConfigLoader::new(None)
            .with_search_dir(dir.path())
            .load_with_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database.url, "sqlite://env.db");
        assert_eq!(config.migrations.dir, PathBuf::from("db/migrations"));
        // empty values are ignored
        assert_eq!(config.migrations.table, "_migrations");
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let mut config = AppConfig::default();
        config.migrations.table = "applied; DROP TABLE orders".into();
        assert!(validate(&config).is_err());

        config.migrations.table = "schema_versions".into();
        assert!(validate(&config).is_ok());
        assert!(!is_plain_identifier("1abc"));
    }

    #[test]
    fn rejects_zero_statement_timeout() {
        let mut config = AppConfig::default();
        config.migrations.statement_timeout_secs = Some(0);
        assert!(validate(&config).is_err());
    }
}
