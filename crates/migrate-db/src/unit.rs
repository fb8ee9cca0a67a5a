use migrate_common::{Error, Result, Version};
use ring::digest::{SHA256, digest};
use serde::Serialize;

use crate::splitter::split_statements;

/// A migration compiled into the binary.
///
/// Each migration has a version number and a SQL script. Scripts are split
/// into statements the same way `.sql` files are.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const EMBEDDED_SOURCE: &str = "embedded";

/// One atomic, ordered batch of schema statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationUnit {
    version: Version,
    name: String,
    source: String,
    statements: Vec<String>,
    checksum: String,
}

impl MigrationUnit {
    /// Build a unit from already separated statements.
    pub fn new(
        version: Version,
        name: impl Into<String>,
        source: impl Into<String>,
        statements: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let source = source.into();
        if name.trim().is_empty() {
            return Err(Error::MalformedUnit {
                unit: source,
                reason: "migration name is empty".into(),
            });
        }
        if statements.is_empty() {
            return Err(Error::MalformedUnit {
                unit: source,
                reason: "contains no statements".into(),
            });
        }
        if let Some(pos) = statements.iter().position(|s| s.trim().is_empty()) {
            return Err(Error::MalformedUnit {
                unit: source,
                reason: format!("statement {} is blank", pos + 1),
            });
        }
        if let Some(pos) = statements.iter().position(|s| is_transaction_control(s)) {
            return Err(Error::MalformedUnit {
                unit: source,
                reason: format!(
                    "statement {} would end the migration's own transaction",
                    pos + 1
                ),
            });
        }

        let checksum = checksum_statements(&statements);
        Ok(Self {
            version,
            name,
            source,
            statements,
            checksum,
        })
    }

    /// Split a SQL script into statements and build a unit from them.
    pub fn parse(
        version: Version,
        name: impl Into<String>,
        source: impl Into<String>,
        sql: &str,
    ) -> Result<Self> {
        let source = source.into();
        let statements = split_statements(sql).map_err(|e| Error::MalformedUnit {
            unit: source.clone(),
            reason: e.to_string(),
        })?;
        Self::new(version, name, source, statements)
    }

    pub fn from_embedded(migration: &Migration) -> Result<Self> {
        if migration.version < 0 {
            return Err(Error::MalformedUnit {
                unit: format!("{EMBEDDED_SOURCE} {}", migration.name),
                reason: format!("negative version {}", migration.version),
            });
        }
        Self::parse(
            Version::new(migration.version),
            migration.name,
            EMBEDDED_SOURCE,
            migration.sql,
        )
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Hex SHA-256 over the statements; comment edits do not change it.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// `BEGIN`, `COMMIT`, `END` and `ROLLBACK` (but not `ROLLBACK TO <savepoint>`).
fn is_transaction_control(statement: &str) -> bool {
    let mut words = statement
        .split_whitespace()
        .map(|w| w.to_ascii_uppercase())
        .filter(|w| w != "TRANSACTION");
    match words.next().as_deref() {
        Some("BEGIN" | "COMMIT" | "END") => true,
        Some("ROLLBACK") => words.next().as_deref() != Some("TO"),
        _ => false,
    }
}

pub fn checksum_statements(statements: &[String]) -> String {
    let joined = statements.join(";\n");
    hex::encode(digest(&SHA256, joined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_statement_order() {
        let unit = MigrationUnit::parse(
            Version::new(2),
            "add_area_id",
            "0002_add_area_id.sql",
            "ALTER TABLE orders ADD COLUMN area_id INT NULL;\nUPDATE orders SET area_id = 1;",
        )
        .unwrap();
        assert_eq!(unit.version(), Version::new(2));
        assert_eq!(unit.name(), "add_area_id");
        assert_eq!(unit.statements().len(), 2);
        assert!(unit.statements()[0].starts_with("ALTER TABLE"));
        assert!(unit.statements()[1].starts_with("UPDATE"));
    }

    #[test]
    fn empty_script_is_malformed() {
        let err = MigrationUnit::parse(Version::new(1), "noop", "0001_noop.sql", "-- todo\n")
            .unwrap_err();
        match err {
            Error::MalformedUnit { unit, reason } => {
                assert_eq!(unit, "0001_noop.sql");
                assert_eq!(reason, "contains no statements");
            }
            other => panic!("expected MalformedUnit, got {other:?}"),
        }
    }

    #[test]
    fn unsplittable_script_is_malformed() {
        let err =
            MigrationUnit::parse(Version::new(1), "bad", "0001_bad.sql", "SELECT 'x;").unwrap_err();
        assert!(matches!(err, Error::MalformedUnit { .. }));
        assert!(err.to_string().contains("unterminated ' quote"));
    }

    #[test]
    fn transaction_control_statements_are_malformed() {
        for sql in [
            "CREATE TABLE a (x INT); COMMIT; INSERT INTO missing VALUES (1);",
            "CREATE TABLE b (x INT); COMMIT;",
            "BEGIN; CREATE TABLE c (x INT); END TRANSACTION;",
            "CREATE TABLE d (x INT); rollback;",
        ] {
            let err = MigrationUnit::parse(Version::new(1), "tx", "0001_tx.sql", sql).unwrap_err();
            match err {
                Error::MalformedUnit { reason, .. } => {
                    assert!(reason.contains("own transaction"), "{sql}: {reason}")
                }
                other => panic!("{sql}: expected MalformedUnit, got {other:?}"),
            }
        }
    }

    #[test]
    fn savepoints_and_trigger_bodies_are_allowed() {
        let unit = MigrationUnit::parse(
            Version::new(1),
            "sp",
            "test",
            "SAVEPOINT s; CREATE TABLE a (x INT); ROLLBACK TO s; RELEASE s;
             CREATE TRIGGER t AFTER INSERT ON a BEGIN SELECT 1; END;",
        )
        .unwrap();
        assert_eq!(unit.statements().len(), 5);
    }

    #[test]
    fn checksum_is_hex_sha256_of_joined_statements() {
        let statements = vec![
            "CREATE TABLE a (x INT)".to_string(),
            "CREATE INDEX idx_a ON a (x)".to_string(),
        ];
        assert_eq!(
            checksum_statements(&statements),
            "e4a5ee3535bf44099a7790f891d61a03928ccef84519a7d6e3ff5f63014cbbe5"
        );
    }

    #[test]
    fn blank_statement_is_rejected() {
        let err = MigrationUnit::new(
            Version::new(1),
            "x",
            "test",
            vec!["SELECT 1".into(), "  ".into()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("statement 2 is blank"));
    }

    #[test]
    fn checksum_ignores_comments_but_not_statements() {
        let a = MigrationUnit::parse(Version::new(1), "a", "a", "-- v1\nCREATE TABLE t (x INT);")
            .unwrap();
        let b = MigrationUnit::parse(
            Version::new(1),
            "a",
            "a",
            "-- reworded header\nCREATE TABLE t (x INT); -- note",
        )
        .unwrap();
        let c = MigrationUnit::parse(Version::new(1), "a", "a", "CREATE TABLE t (y INT);").unwrap();

        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_eq!(a.checksum().len(), 64);
    }

    #[test]
    fn embedded_migration_converts() {
        const USERS_INDEX: Migration = Migration {
            version: 1,
            name: "users_index",
            sql: "CREATE INDEX idx_u ON users (username);",
        };
        let unit = MigrationUnit::from_embedded(&USERS_INDEX).unwrap();
        assert_eq!(unit.source(), EMBEDDED_SOURCE);
        assert_eq!(unit.statements(), ["CREATE INDEX idx_u ON users (username)"]);
    }
}
