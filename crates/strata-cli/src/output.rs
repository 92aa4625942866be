use strata_common::{Direction, Error};
use strata_db::LedgerEntry;
use strata_migrate::{MigrationDefinition, Plan, RunObserver, RunReport};

/// Prints one line per finished unit as the run progresses.
pub struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn unit_completed(&self, direction: Direction, definition: &dyn MigrationDefinition) {
        let verb = match direction {
            Direction::Up => "applied",
            Direction::Down => "rolled back",
        };
        println!("Migration {} ({}) {verb}", definition.id(), definition.name());
    }

    fn unit_skipped(&self, _direction: Direction, definition: &dyn MigrationDefinition) {
        println!(
            "Migration {} ({}) skipped: not permitted here",
            definition.id(),
            definition.name()
        );
    }

    fn unit_failed(&self, _direction: Direction, definition: &dyn MigrationDefinition, err: &Error) {
        eprintln!("Migration {} ({}) failed: {err}", definition.id(), definition.name());
    }
}

pub fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("Nothing to migrate {}.", plan.direction());
        return;
    }
    println!("Would run {} migration(s) {}:", plan.len(), plan.direction());
    for unit in plan.units() {
        println!("  {:>12}  {}", unit.id(), unit.name());
    }
}

pub fn print_report(report: &RunReport) {
    if report.is_noop() {
        println!("Nothing to migrate {}.", report.direction);
        return;
    }
    let verb = match report.direction {
        Direction::Up => "Applied",
        Direction::Down => "Rolled back",
    };
    println!(
        "{verb} {} migration(s), skipped {}.",
        report.completed.len(),
        report.skipped.len()
    );
}

pub fn print_entries(entries: &[LedgerEntry]) {
    print!("{}", format_entries(entries));
}

fn format_entries(entries: &[LedgerEntry]) -> String {
    if entries.is_empty() {
        return "No migrations applied.\n".to_string();
    }
    let mut out = format!(
        "{:>12}  {:<20}  {:<30}  {}\n",
        "ID", "APPLIED AT", "NAME", "DESCRIPTION"
    );
    for entry in entries {
        out.push_str(&format!(
            "{:>12}  {:<20}  {:<30}  {}\n",
            entry.id,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
            entry.name,
            entry.description
        ));
    }
    out
}
