use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_common::{Error, Result, is_sql_identifier};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file the migrations target.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strata.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory name holding migration files, relative to each scope root.
    pub directory: String,
    /// Ledger table name.
    pub table: String,
    /// Wrap each unit's action and ledger update in one transaction.
    pub transactional: bool,
    /// Migration ids never run in this environment.
    pub excluded: Vec<u64>,
    /// Named roots a migration may live under, e.g. `app` or `app:module`.
    pub scopes: BTreeMap<String, PathBuf>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: "migrations".to_string(),
            table: "migrations".to_string(),
            transactional: true,
            excluded: Vec::new(),
            scopes: BTreeMap::new(),
        }
    }
}

impl MigrationsConfig {
    /// Directories scanned directly for migration files: `<root>/<directory>`
    /// for each plain scope, or `directory` alone when no scopes are set.
    pub fn source_roots(&self) -> Vec<PathBuf> {
        if self.scopes.is_empty() {
            return vec![PathBuf::from(&self.directory)];
        }

        let mut roots: Vec<PathBuf> = Vec::with_capacity(self.scopes.len());
        for (name, root) in &self.scopes {
            let dir = root.join(&self.directory);
            if !is_module_scope(name) && !roots.contains(&dir) {
                roots.push(dir);
            }
        }
        roots
    }

    /// Roots of module scopes (`app:module`). Each entity below such a root
    /// keeps its own `<root>/<entity>/<directory>`.
    pub fn module_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        for (name, root) in &self.scopes {
            if is_module_scope(name) && !roots.contains(root) {
                roots.push(root.clone());
            }
        }
        roots
    }

    /// Resolve the directory a new migration for `scope` is written to.
    ///
    /// A plain scope (`app`) maps to its configured root. A three-part scope
    /// (`app:module:billing`) resolves `app:module` and descends into `billing`.
    pub fn scope_directory(&self, scope: Option<&str>) -> Result<PathBuf> {
        let Some(scope) = scope else {
            let mut scopes = self.scopes.iter();
            return match (scopes.next(), scopes.next()) {
                (None, _) => Ok(PathBuf::from(&self.directory)),
                (Some((name, root)), None) if !is_module_scope(name) => {
                    Ok(root.join(&self.directory))
                }
                _ => Err(Error::Config(format!(
                    "a scope is required, one of: {}",
                    self.scope_names().join(", ")
                ))),
            };
        };

        let parts: Vec<&str> = scope.split(':').collect();
        let root = match parts.as_slice() {
            [_] => self.scopes.get(scope).cloned(),
            [a, b, entity] if !entity.is_empty() => self
                .scopes
                .get(&format!("{a}:{b}"))
                .map(|root| root.join(entity)),
            _ => None,
        };

        root.map(|root| root.join(&self.directory))
            .ok_or_else(|| Error::Config(format!("unknown migration scope '{scope}'")))
    }

    /// Scope names as accepted by `create --scope`; module scopes take an
    /// entity suffix.
    pub fn scope_names(&self) -> Vec<String> {
        self.scopes
            .keys()
            .map(|name| {
                if is_module_scope(name) {
                    format!("{name}:<entity>")
                } else {
                    name.clone()
                }
            })
            .collect()
    }
}

fn is_module_scope(name: &str) -> bool {
    name.contains(':')
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub enabled: bool,
    /// A lease older than this is considered abandoned and may be taken over.
    /// The runner refreshes its lease before every unit, so this only needs
    /// to exceed the duration of the slowest single migration.
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after_secs: 600,
        }
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_sql_identifier(&self.migrations.table) {
            return Err(Error::Config(format!(
                "ledger table name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.migrations.table
            )));
        }
        if self.migrations.directory.trim().is_empty() {
            return Err(Error::Config(
                "migrations directory cannot be empty".into(),
            ));
        }
        if let Some(name) = self
            .migrations
            .scopes
            .keys()
            .find(|name| name.split(':').count() > 2 || name.split(':').any(str::is_empty))
        {
            return Err(Error::Config(format!(
                "migration scope '{name}' must be 'name' or 'name:module'"
            )));
        }
        if self.lock.enabled && self.lock.stale_after_secs == 0 {
            return Err(Error::Config(
                "lock.stale_after_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded against the home directory.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database.path)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
