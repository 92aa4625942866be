use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use strata_common::MigrationId;
use strata_config::AppConfig;
use strata_migrate::naming::{artifact_filename, validate_name};
use tracing::info;

fn template(name: &str, description: Option<&str>) -> String {
    let mut out = format!("-- name: {name}\n");
    if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
        out.push_str(&format!("-- description: {}\n", description.trim()));
    }
    out.push_str("\n-- migrate:up\n\n\n-- migrate:down\n\n");
    out
}

/// Write an empty migration file named after the current Unix time.
pub fn create(
    config: &AppConfig,
    name: &str,
    description: Option<&str>,
    scope: Option<&str>,
) -> Result<PathBuf> {
    let seconds = u64::try_from(Utc::now().timestamp()).context("system clock is before 1970")?;
    create_with_id(config, MigrationId::new(seconds), name, description, scope)
}

fn create_with_id(
    config: &AppConfig,
    id: MigrationId,
    name: &str,
    description: Option<&str>,
    scope: Option<&str>,
) -> Result<PathBuf> {
    let name = name.trim();
    validate_name(name).map_err(|e| anyhow!("invalid migration name '{name}': {e}"))?;

    let dir = config.migrations.scope_directory(scope)?;
    create_at(&dir, id, name, description)
}

fn create_at(
    dir: &std::path::Path,
    id: MigrationId,
    name: &str,
    description: Option<&str>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let path = dir.join(artifact_filename(id, name));
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    fs::write(&path, template(name, description))
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("created migration {}", path.display());
    Ok(path)
}
