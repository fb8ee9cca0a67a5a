use std::fmt::Write;

use migrate_db::{MigrationUnit, RunReport, UnitState, UnitStatus};

const VERSION_W: usize = 16;
const STATE_W: usize = 10;
const NAME_W: usize = 36;

fn row(version: &str, state: &str, name: &str, applied_at: &str) -> String {
    format!("{version:<VERSION_W$}{state:<STATE_W$}{name:<NAME_W$}{applied_at}")
        .trim_end()
        .to_string()
}

fn state_label(state: UnitState) -> &'static str {
    match state {
        UnitState::Applied => "applied",
        UnitState::Pending => "pending",
        UnitState::Modified => "modified",
        UnitState::Missing => "missing",
    }
}

/// Text table for `migrate status`.
pub fn status_table(statuses: &[UnitStatus]) -> String {
    if statuses.is_empty() {
        return "no migrations found\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", row("VERSION", "STATE", "NAME", "APPLIED AT"));
    for s in statuses {
        let applied_at = s
            .applied_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{}",
            row(&s.version.to_string(), state_label(s.state), &s.name, &applied_at)
        );
    }

    let pending = statuses
        .iter()
        .filter(|s| s.state == UnitState::Pending)
        .count();
    let _ = writeln!(out);
    let _ = writeln!(out, "{} applied, {pending} pending", statuses.len() - pending);
    out
}

/// What `up --dry-run` would apply.
pub fn plan_summary(plan: &[MigrationUnit]) -> String {
    if plan.is_empty() {
        return "database is up to date\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "would apply {} migration(s):", plan.len());
    for unit in plan {
        let _ = writeln!(
            out,
            "  {:<VERSION_W$}{} ({} statement{})",
            unit.version().to_string(),
            unit.name(),
            unit.statements().len(),
            if unit.statements().len() == 1 { "" } else { "s" }
        );
    }
    out
}

/// Outcome of `migrate up`; the failure itself goes to stderr.
pub fn run_summary(report: &RunReport) -> String {
    let mut out = String::new();
    for record in &report.applied {
        let _ = writeln!(
            out,
            "applied {:<VERSION_W$}{} ({} ms)",
            record.version.to_string(),
            record.name,
            record.duration_ms
        );
    }
    match (&report.failure, report.applied.is_empty()) {
        (None, true) => {
            let _ = writeln!(out, "database is up to date");
        }
        (None, false) => {
            let _ = writeln!(out, "{} migration(s) applied", report.applied.len());
        }
        (Some(_), _) => {
            let _ = writeln!(
                out,
                "{} migration(s) applied before the run halted",
                report.applied.len()
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use migrate_common::{Error, Version};
    use migrate_db::{AppliedRecord, UnitFailure};

    fn status(version: i64, name: &str, state: UnitState) -> UnitStatus {
        UnitStatus {
            version: Version::new(version),
            name: name.to_string(),
            state,
            applied_at: (state != UnitState::Pending)
                .then(|| Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn status_table_lists_each_version() {
        let table = status_table(&[
            status(1, "create_dispatch_schema", UnitState::Applied),
            status(2, "add_lookup_indexes", UnitState::Modified),
            status(3, "add_order_area_id", UnitState::Pending),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("VERSION"));
        assert!(lines[1].starts_with("1 "));
        assert!(lines[1].contains("applied"));
        assert!(lines[1].ends_with("2024-03-01 12:00:00 UTC"));
        assert!(lines[2].contains("modified"));
        assert!(lines[3].contains("pending"));
        assert!(lines[3].ends_with("add_order_area_id"));
        assert_eq!(lines.last().copied(), Some("2 applied, 1 pending"));
    }

    #[test]
    fn status_json_uses_bare_versions_and_lowercase_states() {
        let json = serde_json::to_value([status(3, "add_order_area_id", UnitState::Pending)]).unwrap();
        assert_eq!(json[0]["version"], 3);
        assert_eq!(json[0]["state"], "pending");
        assert!(json[0]["applied_at"].is_null());
    }

    #[test]
    fn empty_status() {
        assert_eq!(status_table(&[]), "no migrations found\n");
    }

    fn record(version: i64, name: &str) -> AppliedRecord {
        AppliedRecord {
            version: Version::new(version),
            name: name.to_string(),
            checksum: "00".repeat(32),
            applied_at: Utc::now(),
            duration_ms: 4,
            run_id: "run".to_string(),
        }
    }

    #[test]
    fn run_summary_for_up_to_date_and_halted_runs() {
        let report = RunReport {
            run_id: "run".to_string(),
            applied: vec![],
            skipped: vec![],
            failure: None,
        };
        assert_eq!(run_summary(&report), "database is up to date\n");

        let report = RunReport {
            run_id: "run".to_string(),
            applied: vec![record(1, "create_dispatch_schema")],
            skipped: vec![],
            failure: Some(UnitFailure {
                version: Version::new(2),
                name: "add_lookup_indexes".to_string(),
                error: Error::Other("boom".into()),
            }),
        };
        let summary = run_summary(&report);
        assert!(summary.starts_with("applied 1"));
        assert!(summary.contains("create_dispatch_schema (4 ms)"));
        assert!(summary.ends_with("1 migration(s) applied before the run halted\n"));
    }

    #[test]
    fn plan_summary_counts_statements() {
        let unit = MigrationUnit::parse(
            Version::new(3),
            "add_order_area_id",
            "inline",
            "ALTER TABLE orders ADD COLUMN area_id INT; UPDATE orders SET area_id = 0;",
        )
        .unwrap();
        let summary = plan_summary(&[unit]);
        assert!(summary.starts_with("would apply 1 migration(s):"));
        assert!(summary.contains("add_order_area_id (2 statements)"));
        assert_eq!(plan_summary(&[]), "database is up to date\n");
    }
}
