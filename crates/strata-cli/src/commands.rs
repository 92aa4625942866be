use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use strata_common::MigrationId;
use strata_config::AppConfig;
use strata_db::{Database, SqliteLedger};
use strata_migrate::{DirectorySource, Runner};
use tracing::info;

use crate::output::{ConsoleObserver, print_entries, print_plan, print_report};

fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let path = config.database_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Arc::new(db))
}

fn open_ledger(config: &AppConfig) -> Result<SqliteLedger> {
    let db = open_database(config)?;
    Ok(SqliteLedger::new(db, &config.migrations.table)?)
}

fn open_runner(config: &AppConfig) -> Result<Runner> {
    let db = open_database(config)?;
    let ledger = SqliteLedger::new(db.clone(), &config.migrations.table)?;
    if !ledger.is_installed()? {
        bail!(
            "ledger table '{}' does not exist, run `strata install` first",
            config.migrations.table
        );
    }

    let source = Arc::new(DirectorySource::from_config(&config.migrations));
    Ok(Runner::from_config(config, db, source)?.with_observer(ConsoleObserver))
}

pub fn install(config: &AppConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    if ledger.is_installed()? {
        println!("Ledger table '{}' is already installed.", ledger.table());
        return Ok(());
    }
    ledger.install()?;
    println!("Ledger table '{}' installed.", ledger.table());
    Ok(())
}

pub fn uninstall(config: &AppConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    if !ledger.is_installed()? {
        println!("Ledger table '{}' is not installed.", ledger.table());
        return Ok(());
    }
    ledger.uninstall()?;
    println!("Ledger table '{}' dropped.", ledger.table());
    Ok(())
}

pub fn up(config: &AppConfig, to: Option<u64>, dry_run: bool) -> Result<()> {
    let runner = open_runner(config)?;
    let to = to.map(MigrationId::new);

    if dry_run {
        print_plan(&runner.plan_up(to)?);
        return Ok(());
    }
    print_report(&runner.apply_up(to)?);
    Ok(())
}

pub fn down(config: &AppConfig, to: Option<u64>, limit: Option<usize>, dry_run: bool) -> Result<()> {
    let runner = open_runner(config)?;
    let to = to.map(MigrationId::new);

    if dry_run {
        print_plan(&runner.plan_down(to, limit)?);
        return Ok(());
    }
    print_report(&runner.rollback_down(to, limit)?);
    Ok(())
}

pub fn status(config: &AppConfig) -> Result<()> {
    let runner = open_runner(config)?;
    let pending = runner.status()?;
    let applied = runner.history(None, None)?;
    let orphans = runner.orphans()?;

    println!("database: {}", config.database_path().display());
    println!("applied: {}", applied.len());
    match applied.first() {
        Some(last) => println!("last_applied: {} {}", last.id, last.name),
        None => println!("last_applied: none"),
    }
    println!("pending: {}", pending.len());
    for definition in &pending {
        println!("  {:>12}  {}", definition.id(), definition.name());
    }

    if !orphans.is_empty() {
        println!("orphaned: {} (recorded but no longer defined)", orphans.len());
        for entry in &orphans {
            println!("  {:>12}  {}", entry.id, entry.name);
        }
    }
    Ok(())
}

pub fn history(config: &AppConfig, from: Option<&str>, limit: Option<usize>, json: bool) -> Result<()> {
    let since = from.map(parse_since).transpose()?;
    let runner = open_runner(config)?;
    let entries = runner.history(since, limit)?;
    info!("listing {} ledger entries", entries.len());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("failed to serialize history")?
        );
    } else {
        print_entries(&entries);
    }
    Ok(())
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid date '{value}', expected YYYY-MM-DD or RFC 3339"))
}
