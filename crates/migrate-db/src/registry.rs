use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use migrate_common::{Error, Result, Version};
use regex::Regex;
use tracing::{debug, info};

use crate::unit::{Migration, MigrationUnit};

/// A `.sql` file found in a migrations directory, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub version: Version,
    pub name: String,
    pub path: PathBuf,
}

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[Vv]?(\d+)(?:__|_|-)(.+)\.sql$").expect("valid regex")
    })
}

/// Parse `[V]<digits><sep><name>.sql` into a version and name.
pub fn parse_file_name(file_name: &str) -> Result<(Version, String)> {
    let malformed = |reason: &str| Error::MalformedUnit {
        unit: file_name.to_string(),
        reason: reason.to_string(),
    };
    let caps = file_name_pattern()
        .captures(file_name)
        .ok_or_else(|| malformed("file name must look like <version>_<name>.sql"))?;
    let version = caps[1]
        .parse::<Version>()
        .map_err(|e| malformed(e.as_str()))?;
    Ok((version, caps[2].to_string()))
}

/// List migration files in `dir` without reading them.
///
/// Non-`.sql` and hidden files are ignored. Results are ordered by version,
/// then path, and may contain duplicate versions.
pub fn discover(dir: &Path) -> Result<Vec<DiscoveredFile>> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "migrations directory not found: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let raw_name = entry.file_name();
        let Some(file_name) = raw_name.to_str() else {
            if raw_name.to_string_lossy().ends_with(".sql") {
                return Err(Error::MalformedUnit {
                    unit: path.display().to_string(),
                    reason: "file name is not valid UTF-8".into(),
                });
            }
            debug!("skipping non-migration file {}", path.display());
            continue;
        };
        if file_name.starts_with('.') || !file_name.ends_with(".sql") {
            debug!("skipping non-migration file {}", path.display());
            continue;
        }
        let (version, name) = parse_file_name(file_name)?;
        files.push(DiscoveredFile {
            version,
            name,
            path,
        });
    }
    files.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Ordered, duplicate-free set of migration units.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    units: Vec<MigrationUnit>,
}

impl Registry {
    /// Sort `units` by version and reject duplicates.
    pub fn from_units(mut units: Vec<MigrationUnit>) -> Result<Self> {
        units.sort_by_key(|u| u.version());
        for pair in units.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(Error::DuplicateVersion {
                    version: pair[0].version(),
                    first: pair[0].source().to_string(),
                    second: pair[1].source().to_string(),
                });
            }
        }
        Ok(Self { units })
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let files = discover(dir)?;
        let mut units = Vec::with_capacity(files.len());
        for file in files {
            let sql = std::fs::read_to_string(&file.path).map_err(|e| Error::MalformedUnit {
                unit: file.path.display().to_string(),
                reason: format!("unreadable: {e}"),
            })?;
            units.push(MigrationUnit::parse(
                file.version,
                file.name,
                file.path.display().to_string(),
                &sql,
            )?);
        }
        let registry = Self::from_units(units)?;
        info!(
            "loaded {} migrations from {}",
            registry.len(),
            dir.display()
        );
        Ok(registry)
    }

    pub fn from_embedded(migrations: &[Migration]) -> Result<Self> {
        let units = migrations
            .iter()
            .map(MigrationUnit::from_embedded)
            .collect::<Result<Vec<_>>>()?;
        Self::from_units(units)
    }

    /// Units in strictly ascending version order.
    pub fn list(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn get(&self, version: Version) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by_key(&version, |u| u.version())
            .ok()
            .map(|idx| &self.units[idx])
    }

    pub fn latest(&self) -> Option<Version> {
        self.units.last().map(|u| u.version())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
