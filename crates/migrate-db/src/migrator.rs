use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use migrate_common::{Error, Result, Version};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::executor::{Executor, RunOptions, RunReport};
use crate::registry::Registry;
use crate::tracker::{AppliedRecord, Tracker};
use crate::unit::MigrationUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Applied,
    Pending,
    /// Applied, but the file's statements changed since.
    Modified,
    /// Applied, but no longer present in the registry.
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub version: Version,
    pub name: String,
    pub state: UnitState,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Registry + tracker + executor bound to one connection.
pub struct Migrator {
    conn: Connection,
    registry: Registry,
    tracker: Tracker,
    options: RunOptions,
}

impl Migrator {
    pub fn new(conn: Connection, registry: Registry, tracker: Tracker) -> Self {
        Self {
            conn,
            registry,
            tracker,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Applied records; a database without the bookkeeping table has none.
    pub fn applied(&self) -> Result<Vec<AppliedRecord>> {
        if !self.tracker.exists(&self.conn)? {
            return Ok(Vec::new());
        }
        self.tracker.applied(&self.conn)
    }

    /// Pending units up to and including `target`, after pre-flight checks.
    pub fn plan(&self, target: Option<Version>) -> Result<Vec<MigrationUnit>> {
        let applied = self.applied()?;
        if let Some(issue) = self.issues(&applied).into_iter().next() {
            return Err(issue);
        }
        if let Some(target) = target {
            if self.registry.get(target).is_none() {
                return Err(Error::NotFound(format!("migration version {target}")));
            }
        }

        let applied_versions: BTreeMap<Version, &AppliedRecord> =
            applied.iter().map(|r| (r.version, r)).collect();
        Ok(self
            .registry
            .list()
            .iter()
            .filter(|u| !applied_versions.contains_key(&u.version()))
            .filter(|u| target.is_none_or(|t| u.version() <= t))
            .cloned()
            .collect())
    }

    /// Apply every pending unit (up to `target`), halting on the first failure.
    pub fn up(&mut self, target: Option<Version>) -> Result<RunReport> {
        let pending = self.plan(target)?;
        if pending.is_empty() {
            info!("database is up to date");
        } else {
            info!("{} pending migration(s)", pending.len());
        }
        Executor::new(&mut self.conn, &self.tracker, self.options.clone()).run(&pending)
    }

    /// One entry per registered or applied version, ascending.
    pub fn status(&self) -> Result<Vec<UnitStatus>> {
        let applied: BTreeMap<Version, AppliedRecord> = self
            .applied()?
            .into_iter()
            .map(|r| (r.version, r))
            .collect();

        let mut statuses: BTreeMap<Version, UnitStatus> = BTreeMap::new();
        for unit in self.registry.list() {
            let record = applied.get(&unit.version());
            let state = match record {
                None => UnitState::Pending,
                Some(r) if r.checksum != unit.checksum() => UnitState::Modified,
                Some(_) => UnitState::Applied,
            };
            statuses.insert(
                unit.version(),
                UnitStatus {
                    version: unit.version(),
                    name: unit.name().to_string(),
                    state,
                    applied_at: record.map(|r| r.applied_at),
                },
            );
        }
        for record in applied.values() {
            statuses.entry(record.version).or_insert_with(|| UnitStatus {
                version: record.version,
                name: record.name.clone(),
                state: UnitState::Missing,
                applied_at: Some(record.applied_at),
            });
        }
        Ok(statuses.into_values().collect())
    }

    /// Problems that would stop `up`, without applying anything.
    pub fn validate(&self) -> Result<Vec<Error>> {
        let applied = self.applied()?;
        Ok(self.issues(&applied))
    }

    fn issues(&self, applied: &[AppliedRecord]) -> Vec<Error> {
        let mut issues = Vec::new();
        let by_version: BTreeMap<Version, &AppliedRecord> =
            applied.iter().map(|r| (r.version, r)).collect();

        for record in applied {
            if self.registry.get(record.version).is_none() {
                warn!(
                    "applied migration {} ({}) is not in the registry",
                    record.version, record.name
                );
            }
        }

        if self.options.verify_checksums {
            for unit in self.registry.list() {
                if let Some(record) = by_version.get(&unit.version()) {
                    if record.checksum != unit.checksum() {
                        issues.push(Error::ChecksumMismatch {
                            version: unit.version(),
                            name: unit.name().to_string(),
                            expected: record.checksum.clone(),
                            actual: unit.checksum().to_string(),
                        });
                    }
                }
            }
        }

        if let Some(highest) = by_version.keys().next_back().copied() {
            for unit in self.registry.list() {
                if unit.version() < highest && !by_version.contains_key(&unit.version()) {
                    issues.push(Error::OutOfOrder {
                        version: unit.version(),
                        name: unit.name().to_string(),
                        highest,
                    });
                }
            }
        }
        issues
    }
}
