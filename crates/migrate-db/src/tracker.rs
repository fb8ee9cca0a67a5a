use chrono::{DateTime, SecondsFormat, Utc};
use migrate_common::{Error, Result, Version, is_plain_identifier};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::unit::MigrationUnit;

/// Proof that a migration version was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRecord {
    pub version: Version,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub run_id: String,
}

impl AppliedRecord {
    pub fn for_unit(unit: &MigrationUnit, duration_ms: u64, run_id: &str) -> Self {
        Self {
            version: unit.version(),
            name: unit.name().to_string(),
            checksum: unit.checksum().to_string(),
            applied_at: Utc::now(),
            duration_ms,
            run_id: run_id.to_string(),
        }
    }
}

/// Bookkeeping table of applied versions, stored next to the target schema.
///
/// Methods take the connection to work on so that `mark_applied` can share
/// the transaction that executed the unit's statements.
#[derive(Debug, Clone)]
pub struct Tracker {
    table: String,
}

impl Tracker {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_plain_identifier(&table) {
            return Err(Error::Config(format!(
                "invalid tracker table name: {table:?}"
            )));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the bookkeeping table on first use.
    pub fn ensure_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                run_id TEXT NOT NULL
            );",
            table = self.table
        ))
        .map_err(|e| {
            Error::TrackerUnavailable(format!("failed to create table {}: {e}", self.table))
        })
    }

    /// Whether the bookkeeping table has been created, without creating it.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.table],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .map_err(|e| Error::TrackerUnavailable(format!("failed to inspect schema: {e}")))
    }

    pub fn is_applied(&self, conn: &Connection, version: Version) -> Result<bool> {
        conn.query_row(
            &format!("SELECT 1 FROM {} WHERE version = ?1", self.table),
            params![version.get()],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(|e| Error::TrackerUnavailable(format!("failed to read applied state: {e}")))
    }

    /// Insert the record; a version that is already present is a claim
    /// conflict with another runner.
    pub fn mark_applied(&self, conn: &Connection, record: &AppliedRecord) -> Result<()> {
        let duration_ms = i64::try_from(record.duration_ms).unwrap_or(i64::MAX);
        conn.execute(
            &format!(
                "INSERT INTO {} (version, name, checksum, applied_at, duration_ms, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.table
            ),
            params![
                record.version.get(),
                record.name,
                record.checksum,
                record
                    .applied_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                duration_ms,
                record.run_id,
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Error::ConcurrentClaimConflict {
                version: record.version,
            },
            _ => Error::TrackerUnavailable(format!(
                "failed to record migration {}: {e}",
                record.version
            )),
        })?;
        debug!("recorded migration {} as applied", record.version);
        Ok(())
    }

    pub fn highest_applied(&self, conn: &Connection) -> Result<Option<Version>> {
        conn.query_row(
            &format!("SELECT MAX(version) FROM {}", self.table),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map(|v| v.map(Version::new))
        .map_err(|e| Error::TrackerUnavailable(format!("failed to read highest version: {e}")))
    }

    /// All records ordered by version.
    pub fn applied(&self, conn: &Connection) -> Result<Vec<AppliedRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, name, checksum, applied_at, duration_ms, run_id
                 FROM {}
                 ORDER BY version ASC",
                self.table
            ))
            .map_err(|e| Error::TrackerUnavailable(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedRecord {
                    version: Version::new(row.get(0)?),
                    name: row.get(1)?,
                    checksum: row.get(2)?,
                    applied_at: parse_datetime(row.get::<_, String>(3)?),
                    duration_ms: row.get::<_, i64>(4)?.max(0) as u64,
                    run_id: row.get(5)?,
                })
            })
            .map_err(|e| Error::TrackerUnavailable(format!("failed to query records: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::TrackerUnavailable(format!("failed to read record row: {e}")))?,
            );
        }
        Ok(records)
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // rows written by hand may use SQLite's datetime('now') format
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or(DateTime::UNIX_EPOCH)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: i64) -> AppliedRecord {
        AppliedRecord {
            version: Version::new(version),
            name: format!("m{version}"),
            checksum: "abc".into(),
            applied_at: Utc::now(),
            duration_ms: 12,
            run_id: "run-1".into(),
        }
    }

    fn setup() -> (Connection, Tracker) {
        let conn = Connection::open_in_memory().unwrap();
        let tracker = Tracker::new("_migrations").unwrap();
        tracker.ensure_table(&conn).unwrap();
        (conn, tracker)
    }

    #[test]
    fn empty_tracker_has_nothing_applied() {
        let (conn, tracker) = setup();
        assert!(!tracker.is_applied(&conn, Version::new(1)).unwrap());
        assert_eq!(tracker.highest_applied(&conn).unwrap(), None);
        assert!(tracker.applied(&conn).unwrap().is_empty());
    }

    #[test]
    fn mark_and_read_back() {
        let (conn, tracker) = setup();
        tracker.mark_applied(&conn, &record(2)).unwrap();
        tracker.mark_applied(&conn, &record(1)).unwrap();

        assert!(tracker.is_applied(&conn, Version::new(1)).unwrap());
        assert!(tracker.is_applied(&conn, Version::new(2)).unwrap());
        assert!(!tracker.is_applied(&conn, Version::new(3)).unwrap());
        assert_eq!(tracker.highest_applied(&conn).unwrap(), Some(Version::new(2)));

        let records = tracker.applied(&conn).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].version, Version::new(1));
        assert_eq!(records[1].name, "m2");
        assert_eq!(records[1].duration_ms, 12);
        assert_eq!(records[1].run_id, "run-1");
    }

    #[test]
    fn applied_at_survives_round_trip_to_millisecond() {
        let (conn, tracker) = setup();
        let rec = record(1);
        tracker.mark_applied(&conn, &rec).unwrap();
        let stored = &tracker.applied(&conn).unwrap()[0];
        let drift = (stored.applied_at - rec.applied_at).num_milliseconds().abs();
        assert!(drift <= 1);
    }

    #[test]
    fn second_insert_of_same_version_is_a_claim_conflict() {
        let (conn, tracker) = setup();
        tracker.mark_applied(&conn, &record(1)).unwrap();
        let err = tracker.mark_applied(&conn, &record(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::ConcurrentClaimConflict { version } if version == Version::new(1)
        ));
    }

    #[test]
    fn missing_table_is_tracker_unavailable() {
        let conn = Connection::open_in_memory().unwrap();
        let tracker = Tracker::new("_migrations").unwrap();
        let err = tracker.is_applied(&conn, Version::new(1)).unwrap_err();
        assert!(matches!(err, Error::TrackerUnavailable(_)));
    }

    #[test]
    fn exists_does_not_create_the_table() {
        let conn = Connection::open_in_memory().unwrap();
        let tracker = Tracker::new("_migrations").unwrap();
        assert!(!tracker.exists(&conn).unwrap());
        assert!(!tracker.exists(&conn).unwrap());
        tracker.ensure_table(&conn).unwrap();
        assert!(tracker.exists(&conn).unwrap());
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let (conn, tracker) = setup();
        tracker.mark_applied(&conn, &record(1)).unwrap();
        tracker.ensure_table(&conn).unwrap();
        assert_eq!(tracker.applied(&conn).unwrap().len(), 1);
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(Tracker::new("schema_history").is_ok());
        assert!(Tracker::new("").is_err());
        assert!(Tracker::new("x; DROP TABLE users").is_err());
        assert!(Tracker::new("9lives").is_err());
        assert!(Tracker::new("t".repeat(64)).is_err());
    }

    #[test]
    fn parses_sqlite_datetime_format() {
        let dt = parse_datetime("2024-06-11 09:30:00".into());
        assert_eq!(dt.to_rfc3339(), "2024-06-11T09:30:00+00:00");
    }
}
