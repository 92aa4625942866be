use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_common::{Direction, Error, MigrationId, Result, Step};
use strata_config::AppConfig;
use strata_db::{
    Database, LeaseLock, LedgerEntry, LedgerOrder, LedgerQuery, MigrationLedger, RunLock,
    SqlExecutor, SqliteLedger,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AllowAll, Authorization, ExcludeIds};
use crate::definition::{MigrationDefinition, SharedDefinition};
use crate::observer::{LogObserver, RunObserver};
use crate::plan::Plan;
use crate::source::MigrationSource;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: Direction,
    pub planned: usize,
    pub completed: Vec<MigrationId>,
    pub skipped: Vec<MigrationId>,
}

impl RunReport {
    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            planned: 0,
            completed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Nothing was eligible to run.
    pub fn is_noop(&self) -> bool {
        self.planned == 0
    }
}

/// Drives the per-unit apply/revert protocol against one target.
pub struct Runner {
    source: Arc<dyn MigrationSource>,
    ledger: Arc<dyn MigrationLedger>,
    executor: Arc<dyn SqlExecutor>,
    authorization: Box<dyn Authorization>,
    observer: Box<dyn RunObserver>,
    lock: Option<Arc<dyn RunLock>>,
    transactional: bool,
}

impl Runner {
    pub fn new(
        source: Arc<dyn MigrationSource>,
        ledger: Arc<dyn MigrationLedger>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        Self {
            source,
            ledger,
            executor,
            authorization: Box::new(AllowAll),
            observer: Box::new(LogObserver),
            lock: None,
            transactional: false,
        }
    }

    /// Wire a runner for a SQLite target from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        db: Arc<Database>,
        source: Arc<dyn MigrationSource>,
    ) -> Result<Self> {
        let table = &config.migrations.table;
        let ledger = SqliteLedger::new(db.clone(), table)?;

        let mut runner = Self::new(source, Arc::new(ledger), db.clone())
            .with_transactional(config.migrations.transactional);

        if !config.migrations.excluded.is_empty() {
            runner = runner.with_authorization(ExcludeIds::new(
                config.migrations.excluded.iter().copied().map(MigrationId::new),
            ));
        }

        if config.lock.enabled {
            let lock = LeaseLock::new(db, table, config.lock.stale_after())?;
            runner = runner.with_lock(Arc::new(lock));
        }

        Ok(runner)
    }

    pub fn with_authorization(mut self, authorization: impl Authorization + 'static) -> Self {
        self.authorization = Box::new(authorization);
        self
    }

    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn RunLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Wrap each unit, ledger update included, in its own transaction.
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Pending definitions with `id <= to`, ascending.
    pub fn plan_up(&self, to: Option<MigrationId>) -> Result<Plan> {
        let all = self.source.list_all()?;
        let applied = self.ledger.applied_ids()?;

        let units = all
            .into_iter()
            .filter(|d| !applied.contains(&d.id()))
            .filter(|d| to.is_none_or(|to| d.id() <= to))
            .collect();
        Ok(Plan::new(Direction::Up, units))
    }

    /// Applied definitions with `id > to`, most recent id first, at most `limit`.
    pub fn plan_down(&self, to: Option<MigrationId>, limit: Option<usize>) -> Result<Plan> {
        let all = self.source.list_all()?;
        let by_id: HashMap<MigrationId, SharedDefinition> =
            all.into_iter().map(|d| (d.id(), d)).collect();

        let query = LedgerQuery::new()
            .above(to)
            .limit(limit)
            .order(LedgerOrder::IdDescending);

        let units = self
            .ledger
            .list_applied(&query)?
            .into_iter()
            .map(|entry| {
                by_id.get(&entry.id).cloned().ok_or_else(|| Error::OrphanedEntry {
                    id: entry.id,
                    name: entry.name,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Plan::new(Direction::Down, units))
    }

    pub fn apply_up(&self, to: Option<MigrationId>) -> Result<RunReport> {
        self.locked(|lease| {
            let plan = self.plan_up(to)?;
            self.execute(&plan, lease)
        })
    }

    pub fn rollback_down(&self, to: Option<MigrationId>, limit: Option<usize>) -> Result<RunReport> {
        self.locked(|lease| {
            let plan = self.plan_down(to, limit)?;
            self.execute(&plan, lease)
        })
    }

    /// Definitions not yet applied, ascending.
    pub fn status(&self) -> Result<Vec<SharedDefinition>> {
        Ok(self.plan_up(None)?.units().to_vec())
    }

    /// Ledger entries, most recent id first.
    pub fn history(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>> {
        let query = LedgerQuery::new()
            .since(since)
            .limit(limit)
            .order(LedgerOrder::IdDescending);
        self.ledger.list_applied(&query)
    }

    /// Ledger entries with no resolvable definition.
    pub fn orphans(&self) -> Result<Vec<LedgerEntry>> {
        let known: BTreeSet<MigrationId> = self.source.list_all()?.iter().map(|d| d.id()).collect();
        Ok(self
            .ledger
            .list_applied(&LedgerQuery::new())?
            .into_iter()
            .filter(|e| !known.contains(&e.id))
            .collect())
    }

    fn locked(
        &self,
        run: impl FnOnce(Option<&HeldLease<'_>>) -> Result<RunReport>,
    ) -> Result<RunReport> {
        let Some(lock) = &self.lock else {
            return run(None);
        };

        let holder = format!("strata-{}", Uuid::new_v4());
        lock.acquire(&holder)?;
        let outcome = run(Some(&HeldLease {
            lock: lock.as_ref(),
            holder: &holder,
        }));

        match (outcome, lock.release(&holder)) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("failed to release migration lease {holder}: {release_err}");
                Err(e)
            }
        }
    }

    fn execute(&self, plan: &Plan, lease: Option<&HeldLease<'_>>) -> Result<RunReport> {
        let direction = plan.direction();
        if plan.is_empty() {
            info!("nothing to migrate {direction}");
            return Ok(RunReport::empty(direction));
        }

        info!("running {} migration(s) {direction}", plan.len());
        let mut report = RunReport {
            planned: plan.len(),
            ..RunReport::empty(direction)
        };

        for unit in plan.units() {
            let unit = unit.as_ref();
            if let Some(lease) = lease {
                lease.lock.refresh(lease.holder)?;
            }
            if !self.authorization.permits(unit, direction) {
                self.observer.unit_skipped(direction, unit);
                report.skipped.push(unit.id());
                continue;
            }

            self.observer.unit_started(direction, unit);
            if let Err(e) = self.run_unit(direction, unit) {
                self.observer.unit_failed(direction, unit, &e);
                return Err(e);
            }
            self.observer.unit_completed(direction, unit);
            report.completed.push(unit.id());
        }

        Ok(report)
    }

    fn run_unit(&self, direction: Direction, unit: &dyn MigrationDefinition) -> Result<()> {
        if !self.transactional {
            return self.run_steps(direction, unit);
        }

        self.executor.begin()?;
        let outcome = self.run_steps(direction, unit).and_then(|()| {
            self.executor
                .commit()
                .map_err(|e| step_error(unit, Step::LedgerUpdate, e))
        });

        if outcome.is_err() {
            if let Err(rollback_err) = self.executor.rollback() {
                warn!("rollback of migration {} failed: {rollback_err}", unit.id());
            }
        }
        outcome
    }

    fn run_steps(&self, direction: Direction, unit: &dyn MigrationDefinition) -> Result<()> {
        let sql = self.executor.as_ref();
        debug!("migration {} {direction}: before hook", unit.id());

        match direction {
            Direction::Up => {
                unit.before_apply(sql).map_err(|e| step_error(unit, Step::BeforeHook, e))?;
                unit.apply(sql).map_err(|e| step_error(unit, Step::Action, e))?;
                unit.after_apply(sql).map_err(|e| step_error(unit, Step::AfterHook, e))?;
                self.ledger
                    .record_applied(&LedgerEntry {
                        id: unit.id(),
                        applied_at: Utc::now(),
                        name: unit.name().to_string(),
                        description: unit.description().to_string(),
                    })
                    .map_err(|e| ledger_error(unit, e))
            }
            Direction::Down => {
                unit.before_revert(sql).map_err(|e| step_error(unit, Step::BeforeHook, e))?;
                unit.revert(sql).map_err(|e| step_error(unit, Step::Action, e))?;
                unit.after_revert(sql).map_err(|e| step_error(unit, Step::AfterHook, e))?;
                self.ledger.remove_applied(unit.id()).map_err(|e| ledger_error(unit, e))
            }
        }
    }
}

struct HeldLease<'a> {
    lock: &'a dyn RunLock,
    holder: &'a str,
}

fn step_error(unit: &dyn MigrationDefinition, step: Step, err: Error) -> Error {
    Error::Action {
        id: unit.id(),
        name: unit.name().to_string(),
        step,
        message: err.to_string(),
    }
}

fn ledger_error(unit: &dyn MigrationDefinition, err: Error) -> Error {
    match err {
        Error::DuplicateEntry { .. } | Error::NotFound { .. } => err,
        other => step_error(unit, Step::LedgerUpdate, other),
    }
}
