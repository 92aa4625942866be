use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strata_common::{Direction, Error, MigrationId, Result, Step};
use strata_config::AppConfig;
use strata_db::{Database, LeaseLock, MigrationLedger, RunLock, SqlExecutor, SqliteLedger};
use strata_migrate::{DirectorySource, MigrationDefinition, MigrationSource, Registry, Runner};

type Journal = Arc<Mutex<Vec<String>>>;

/// Records every call it receives, optionally failing its apply or revert.
struct Tracked {
    id: MigrationId,
    name: String,
    fail_action: bool,
    fail_revert: bool,
    journal: Journal,
}

impl Tracked {
    fn new(id: u64, journal: &Journal) -> Self {
        Self {
            id: MigrationId::new(id),
            name: format!("Tracked {id}"),
            fail_action: false,
            fail_revert: false,
            journal: journal.clone(),
        }
    }

    fn failing(mut self) -> Self {
        self.fail_action = true;
        self
    }

    fn failing_revert(mut self) -> Self {
        self.fail_revert = true;
        self
    }

    fn log(&self, what: &str) {
        self.journal.lock().unwrap().push(format!("{what} {}", self.id));
    }
}

impl MigrationDefinition for Tracked {
    fn id(&self) -> MigrationId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "records calls"
    }

    fn apply(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        self.log("apply");
        if self.fail_action {
            return Err(Error::Execution("boom".into()));
        }
        Ok(())
    }

    fn revert(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        self.log("revert");
        if self.fail_revert {
            return Err(Error::Execution("boom".into()));
        }
        Ok(())
    }

    fn before_apply(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        self.log("before_apply");
        Ok(())
    }

    fn after_apply(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        self.log("after_apply");
        Ok(())
    }

    fn before_revert(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        self.log("before_revert");
        Ok(())
    }

    fn after_revert(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        self.log("after_revert");
        Ok(())
    }
}

struct Harness {
    db: Arc<Database>,
    ledger: Arc<SqliteLedger>,
    journal: Journal,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Database::in_memory().unwrap());
        let ledger = Arc::new(SqliteLedger::new(db.clone(), "migrations").unwrap());
        ledger.install().unwrap();
        Self {
            db,
            ledger,
            journal: Arc::default(),
        }
    }

    fn tracked(&self, ids: &[u64]) -> Registry {
        ids.iter()
            .fold(Registry::new(), |r, id| r.with(Tracked::new(*id, &self.journal)))
    }

    fn runner(&self, source: impl MigrationSource + 'static) -> Runner {
        Runner::new(Arc::new(source), self.ledger.clone(), self.db.clone())
    }

    fn applied(&self) -> BTreeSet<u64> {
        self.ledger.applied_ids().unwrap().into_iter().map(|id| id.value()).collect()
    }

    fn calls(&self, prefix: &str) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn ids(values: &[u64]) -> Vec<MigrationId> {
    values.iter().copied().map(MigrationId::new).collect()
}

fn set(values: &[u64]) -> BTreeSet<u64> {
    values.iter().copied().collect()
}

#[test]
fn applies_in_ascending_order() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[30, 10, 20]));

    let report = runner.apply_up(None).unwrap();
    assert_eq!(report.direction, Direction::Up);
    assert_eq!(report.completed, ids(&[10, 20, 30]));
    assert_eq!(h.calls("apply "), vec!["apply 10", "apply 20", "apply 30"]);
    assert_eq!(
        h.calls("")[..3],
        ["before_apply 10", "apply 10", "after_apply 10"]
    );
}

#[test]
fn upper_bound_limits_the_plan() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[10, 20, 30]));

    let report = runner.apply_up(Some(MigrationId::new(20))).unwrap();
    assert_eq!(report.completed, ids(&[10, 20]));
    assert_eq!(h.applied(), set(&[10, 20]));
}

#[test]
fn planning_is_idempotent_and_diffs_against_ledger() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[10, 20, 30]));
    runner.apply_up(Some(MigrationId::new(20))).unwrap();

    let first = runner.plan_up(None).unwrap();
    let second = runner.plan_up(None).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.ids(), ids(&[30]));

    let pending: Vec<MigrationId> = runner.status().unwrap().iter().map(|d| d.id()).collect();
    assert_eq!(pending, ids(&[30]));
}

#[test]
fn rolls_back_most_recent_first() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[10, 20, 30]));
    runner.apply_up(None).unwrap();

    let report = runner.rollback_down(None, Some(2)).unwrap();
    assert_eq!(report.direction, Direction::Down);
    assert_eq!(report.completed, ids(&[30, 20]));
    assert_eq!(h.calls("revert"), vec!["revert 30", "revert 20"]);
    assert_eq!(h.applied(), set(&[10]));
}

#[test]
fn revert_runs_hooks_around_the_action() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[10]));
    runner.apply_up(None).unwrap();
    h.journal.lock().unwrap().clear();

    runner.rollback_down(None, None).unwrap();
    assert_eq!(
        h.calls(""),
        vec!["before_revert 10", "revert 10", "after_revert 10"]
    );
    assert!(h.applied().is_empty());
}

#[test]
fn rollback_halts_on_first_failure() {
    let h = Harness::new();
    let registry = Registry::new()
        .with(Tracked::new(10, &h.journal))
        .with(Tracked::new(20, &h.journal).failing_revert())
        .with(Tracked::new(30, &h.journal));
    let runner = h.runner(registry);
    runner.apply_up(None).unwrap();
    h.journal.lock().unwrap().clear();

    let err = runner.rollback_down(None, None).unwrap_err();
    assert_eq!(err.migration_id(), Some(MigrationId::new(20)));
    assert!(matches!(err, Error::Action { step: Step::Action, ref name, .. } if name == "Tracked 20"));
    assert_eq!(h.applied(), set(&[10, 20]));
    assert_eq!(
        h.calls(""),
        vec![
            "before_revert 30",
            "revert 30",
            "after_revert 30",
            "before_revert 20",
            "revert 20",
        ]
    );
}

#[test]
fn rollback_stops_at_target() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[10, 20, 30]));
    runner.apply_up(None).unwrap();

    assert_eq!(runner.plan_down(Some(MigrationId::new(10)), None).unwrap().ids(), ids(&[30, 20]));
    runner.rollback_down(Some(MigrationId::new(10)), None).unwrap();
    assert_eq!(h.applied(), set(&[10]));
}

#[test]
fn halts_on_first_failure() {
    let h = Harness::new();
    let registry = Registry::new()
        .with(Tracked::new(10, &h.journal))
        .with(Tracked::new(20, &h.journal).failing())
        .with(Tracked::new(30, &h.journal));
    let runner = h.runner(registry);

    let err = runner.apply_up(None).unwrap_err();
    assert_eq!(err.migration_id(), Some(MigrationId::new(20)));
    assert!(matches!(err, Error::Action { step: Step::Action, ref name, .. } if name == "Tracked 20"));
    assert_eq!(h.applied(), set(&[10]));
    assert!(!h.calls("").iter().any(|c| c.ends_with(" 30")));
}

#[test]
fn apply_then_revert_restores_ledger() {
    let h = Harness::new();
    let runner = h.runner(h.tracked(&[10, 20]));
    runner.apply_up(Some(MigrationId::new(10))).unwrap();
    let before = runner.history(None, None).unwrap();

    runner.apply_up(None).unwrap();
    runner.rollback_down(None, Some(1)).unwrap();

    assert_eq!(runner.history(None, None).unwrap(), before);
}

#[test]
fn denied_units_are_skipped_not_failed() {
    let h = Harness::new();
    let runner = h
        .runner(h.tracked(&[10, 20, 30]))
        .with_authorization(|d: &dyn MigrationDefinition, _: Direction| d.id() != MigrationId::new(20));

    let report = runner.apply_up(None).unwrap();
    assert_eq!(report.completed, ids(&[10, 30]));
    assert_eq!(report.skipped, ids(&[20]));
    assert_eq!(h.applied(), set(&[10, 30]));
    assert!(h.calls("apply 20").is_empty());
}

#[test]
fn duplicate_ids_fail_planning_before_any_action() {
    let h = Harness::new();
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("5___first.sql"), "-- migrate:up\nCREATE TABLE a (id INT);").unwrap();
    fs::write(tmp.path().join("5___second.sql"), "-- migrate:up\nCREATE TABLE b (id INT);").unwrap();
    let runner = h.runner(DirectorySource::single(tmp.path()));

    assert!(matches!(runner.plan_up(None).unwrap_err(), Error::Definition { .. }));
    assert!(matches!(runner.plan_down(None, None).unwrap_err(), Error::Definition { .. }));
    assert!(matches!(runner.apply_up(None).unwrap_err(), Error::Definition { .. }));
    assert!(!h.db.table_exists("a").unwrap());
    assert!(!h.db.table_exists("b").unwrap());
}

#[test]
fn orphaned_entry_fails_rollback_planning() {
    let h = Harness::new();
    h.runner(h.tracked(&[10, 20])).apply_up(None).unwrap();

    let runner = h.runner(h.tracked(&[10]));
    let err = runner.plan_down(None, None).unwrap_err();
    assert!(matches!(err, Error::OrphanedEntry { ref name, .. } if name == "Tracked 20"));
    assert_eq!(err.migration_id(), Some(MigrationId::new(20)));

    // below the orphan, rollback still resolves
    assert_eq!(runner.plan_down(Some(MigrationId::new(20)), None).unwrap().ids(), ids(&[]));
    assert_eq!(runner.orphans().unwrap().len(), 1);
}

#[test]
fn live_lease_blocks_a_second_runner() {
    let h = Harness::new();
    let lock = Arc::new(LeaseLock::new(h.db.clone(), "migrations", Duration::from_secs(600)).unwrap());
    lock.acquire("someone-else").unwrap();

    let runner = h.runner(h.tracked(&[10])).with_lock(lock.clone());
    let err = runner.apply_up(None).unwrap_err();
    assert!(matches!(err, Error::LockUnavailable { ref holder, .. } if holder == "someone-else"));
    assert!(h.applied().is_empty());

    lock.release("someone-else").unwrap();
    runner.apply_up(None).unwrap();
    assert_eq!(h.applied(), set(&[10]));
    assert!(lock.current().unwrap().is_none());
}

#[test]
fn runs_sql_files_from_config() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("migrations");
    fs::create_dir(&dir).unwrap();
    fs::write(
        dir.join("1___create_users.sql"),
        "-- description: Users table\n-- migrate:up\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n-- migrate:down\nDROP TABLE users;\n",
    )
    .unwrap();
    fs::write(
        dir.join("2___add_email.sql"),
        "-- migrate:up\nALTER TABLE users ADD COLUMN email TEXT;\n",
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.migrations.directory = dir.display().to_string();
    config.migrations.excluded = vec![2];

    let db = Arc::new(Database::open(&tmp.path().join("app.db")).unwrap());
    let ledger = SqliteLedger::new(db.clone(), &config.migrations.table).unwrap();
    ledger.install().unwrap();

    let source = Arc::new(DirectorySource::from_config(&config.migrations));
    let runner = Runner::from_config(&config, db.clone(), source).unwrap();

    let report = runner.apply_up(None).unwrap();
    assert_eq!(report.completed, ids(&[1]));
    assert_eq!(report.skipped, ids(&[2]));
    assert!(db.table_exists("users").unwrap());

    let history = runner.history(None, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].name, "Create users");
    assert_eq!(history[0].description, "Users table");

    runner.rollback_down(None, None).unwrap();
    assert!(!db.table_exists("users").unwrap());
    assert!(runner.history(None, None).unwrap().is_empty());
}
