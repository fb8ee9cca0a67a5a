use std::sync::Arc;
use std::time::{Duration, Instant};

use migrate_common::{Error, Result, Version};
use rusqlite::{Connection, ErrorCode, InterruptHandle, TransactionBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::tracker::{AppliedRecord, Tracker};
use crate::unit::MigrationUnit;
use crate::watchdog::Watchdog;

/// Knobs shared by the executor and the migrator.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Per-statement deadline; `None` lets statements run to completion.
    pub statement_timeout: Option<Duration>,
    /// How many times a lost claim is retried before giving up.
    pub claim_retries: u32,
    pub claim_backoff: Duration,
    /// Refuse to run when an applied unit's checksum no longer matches.
    pub verify_checksums: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            statement_timeout: None,
            claim_retries: 3,
            claim_backoff: Duration::from_millis(250),
            verify_checksums: true,
        }
    }
}

/// The unit that halted a run and why.
#[derive(Debug)]
pub struct UnitFailure {
    pub version: Version,
    pub name: String,
    pub error: Error,
}

/// Outcome of one executor run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    /// Units committed by this run, in order.
    pub applied: Vec<AppliedRecord>,
    /// Units another runner applied while this run was waiting.
    pub skipped: Vec<Version>,
    pub failure: Option<UnitFailure>,
}

impl RunReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            applied: Vec::new(),
            skipped: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The applied records, or the error that halted the run.
    pub fn into_result(self) -> Result<Vec<AppliedRecord>> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.applied),
        }
    }
}

enum Claim {
    Applied(AppliedRecord),
    AlreadyApplied,
}

/// Applies pending units one at a time, each inside its own transaction.
pub struct Executor<'a> {
    conn: &'a mut Connection,
    tracker: &'a Tracker,
    options: RunOptions,
    interrupt: Arc<InterruptHandle>,
    run_id: String,
}

impl<'a> Executor<'a> {
    pub fn new(conn: &'a mut Connection, tracker: &'a Tracker, options: RunOptions) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn,
            tracker,
            options,
            interrupt,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Apply `pending` in ascending version order, halting at the first failure.
    ///
    /// Returns `Err` only when the bookkeeping table cannot be prepared, in
    /// which case no unit was attempted. Unit failures are reported in
    /// [`RunReport::failure`] alongside the units committed before the halt.
    pub fn run(&mut self, pending: &[MigrationUnit]) -> Result<RunReport> {
        self.tracker.ensure_table(self.conn)?;

        let mut report = RunReport::new(self.run_id.clone());
        if pending.is_empty() {
            debug!("no pending migrations");
            return Ok(report);
        }

        let mut ordered: Vec<&MigrationUnit> = pending.iter().collect();
        ordered.sort_by_key(|u| u.version());

        for unit in ordered {
            debug!("migration {} ({}): pending -> applying", unit.version(), unit.name());
            match self.apply_with_retry(unit) {
                Ok(Claim::Applied(record)) => {
                    info!(
                        "applied migration {} ({}) in {} ms",
                        record.version, record.name, record.duration_ms
                    );
                    report.applied.push(record);
                }
                Ok(Claim::AlreadyApplied) => {
                    warn!(
                        "migration {} ({}) was applied by another runner, skipping",
                        unit.version(),
                        unit.name()
                    );
                    report.skipped.push(unit.version());
                }
                Err(e) => {
                    error!("migration {} ({}): applying -> failed: {e}", unit.version(), unit.name());
                    report.failure = Some(UnitFailure {
                        version: unit.version(),
                        name: unit.name().to_string(),
                        error: e,
                    });
                    break;
                }
            }
        }
        Ok(report)
    }

    fn apply_with_retry(&mut self, unit: &MigrationUnit) -> Result<Claim> {
        let mut attempt = 0;
        loop {
            match self.apply_unit(unit) {
                Err(Error::ConcurrentClaimConflict { version }) if attempt < self.options.claim_retries => {
                    attempt += 1;
                    warn!(
                        "claim on migration {version} lost (attempt {attempt}/{}), retrying",
                        self.options.claim_retries
                    );
                    std::thread::sleep(self.options.claim_backoff);
                }
                other => return other,
            }
        }
    }

    fn apply_unit(&mut self, unit: &MigrationUnit) -> Result<Claim> {
        let version = unit.version();
        let started = Instant::now();

        // IMMEDIATE takes the database write lock up front, so two runners
        // cannot both get past the applied check for the same unit.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| claim_error(version, e))?;

        if self.tracker.is_applied(&tx, version)? {
            return Ok(Claim::AlreadyApplied);
        }
        if let Some(highest) = self.tracker.highest_applied(&tx)? {
            if highest > version {
                return Err(Error::OutOfOrder {
                    version,
                    name: unit.name().to_string(),
                    highest,
                });
            }
        }

        for (idx, statement) in unit.statements().iter().enumerate() {
            debug!("migration {version} statement {}: {statement}", idx + 1);
            let watchdog = self
                .options
                .statement_timeout
                .map(|timeout| Watchdog::arm(Arc::clone(&self.interrupt), timeout));

            let result = tx.execute_batch(statement);
            let timed_out = watchdog.map(Watchdog::disarm).unwrap_or(false);

            if let Err(source) = result {
                if timed_out {
                    warn!("migration {version} statement {} timed out", idx + 1);
                }
                // dropping `tx` rolls back every statement of this unit
                return Err(Error::StatementExecution {
                    version,
                    name: unit.name().to_string(),
                    index: idx + 1,
                    statement: statement.clone(),
                    source,
                });
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let record = AppliedRecord::for_unit(unit, duration_ms, &self.run_id);
        self.tracker.mark_applied(&tx, &record)?;
        tx.commit().map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Error::ConcurrentClaimConflict { version }
            }
            _ => Error::Database(format!("failed to commit migration {version}: {e}")),
        })?;
        Ok(Claim::Applied(record))
    }
}

fn claim_error(version: Version, e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            Error::ConcurrentClaimConflict { version }
        }
        _ => Error::TrackerUnavailable(format!(
            "failed to begin transaction for migration {version}: {e}"
        )),
    }
}
