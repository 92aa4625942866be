use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_common::{Error, MigrationId, Result};
use strata_config::MigrationsConfig;
use tracing::{debug, info};

use crate::definition::{MigrationDefinition, SharedDefinition};
use crate::naming::{parse_artifact_filename, validate_name};
use crate::sql::SqlMigration;

/// Enumerates every known migration definition.
pub trait MigrationSource: Send + Sync {
    /// All definitions, ascending by id, with ids guaranteed unique.
    fn list_all(&self) -> Result<Vec<SharedDefinition>>;
}

/// Discovers `<id>___<slug>.sql` files in one or more directories.
///
/// Module roots are walked one level deep: every `<module root>/<entity>/<directory>`
/// that exists is scanned as well.
pub struct DirectorySource {
    roots: Vec<PathBuf>,
    modules: Vec<PathBuf>,
    directory: String,
}

impl DirectorySource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            modules: Vec::new(),
            directory: String::new(),
        }
    }

    pub fn single(root: impl Into<PathBuf>) -> Self {
        Self::new(vec![root.into()])
    }

    pub fn from_config(config: &MigrationsConfig) -> Self {
        Self::new(config.source_roots()).with_modules(config.module_roots(), &config.directory)
    }

    /// Also scan `<module>/<entity>/<directory>` for each entity under `modules`.
    pub fn with_modules(mut self, modules: Vec<PathBuf>, directory: &str) -> Self {
        self.modules = modules;
        self.directory = directory.to_string();
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Migration directories of every entity below the module roots.
    fn entity_roots(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for module in &self.modules {
            let module_display = module.display().to_string();
            let entries = fs::read_dir(module).map_err(|e| Error::Discovery {
                path: module_display.clone(),
                message: e.to_string(),
            })?;

            let mut dirs: Vec<PathBuf> = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| Error::Discovery {
                    path: module_display.clone(),
                    message: e.to_string(),
                })?;
                let candidate = entry.path().join(&self.directory);
                if candidate.is_dir() {
                    dirs.push(candidate);
                }
            }
            dirs.sort();
            found.extend(dirs);
        }
        Ok(found)
    }

    fn scan_root(&self, root: &Path, found: &mut Vec<(PathBuf, SqlMigration)>) -> Result<()> {
        let root_display = root.display().to_string();
        let entries = fs::read_dir(root).map_err(|e| Error::Discovery {
            path: root_display.clone(),
            message: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Discovery {
                path: root_display.clone(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if hidden {
                continue;
            }
            if path.is_file() {
                files.push(path);
            } else {
                debug!("skipping non-file entry {}", path.display());
            }
        }
        files.sort();

        for path in files {
            found.push((path.clone(), load_file(&path)?));
        }
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<SqlMigration> {
    let artifact = path.display().to_string();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (id, slug) = parse_artifact_filename(&filename).map_err(|message| Error::Definition {
        artifact: artifact.clone(),
        message,
    })?;

    let contents = fs::read_to_string(path).map_err(|e| Error::Definition {
        artifact: artifact.clone(),
        message: format!("failed to read file: {e}"),
    })?;

    SqlMigration::parse(id, &slug, &contents).map_err(|message| Error::Definition { artifact, message })
}

impl MigrationSource for DirectorySource {
    fn list_all(&self) -> Result<Vec<SharedDefinition>> {
        let mut roots = self.roots.clone();
        roots.extend(self.entity_roots()?);

        let mut found: Vec<(PathBuf, SqlMigration)> = Vec::new();
        for root in &roots {
            self.scan_root(root, &mut found)?;
        }

        let mut seen: HashMap<MigrationId, PathBuf> = HashMap::with_capacity(found.len());
        for (path, migration) in &found {
            if let Some(first) = seen.insert(migration.id(), path.clone()) {
                return Err(Error::Definition {
                    artifact: path.display().to_string(),
                    message: format!(
                        "duplicate migration id {} (also used by {})",
                        migration.id(),
                        first.display()
                    ),
                });
            }
        }

        found.sort_by_key(|(_, m)| m.id());
        info!(
            "discovered {} migration(s) in {} location(s)",
            found.len(),
            roots.len()
        );

        Ok(found
            .into_iter()
            .map(|(_, m)| Arc::new(m) as SharedDefinition)
            .collect())
    }
}

/// Migrations registered explicitly in code.
#[derive(Default)]
pub struct Registry {
    definitions: Vec<SharedDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: impl MigrationDefinition + 'static) -> &mut Self {
        self.definitions.push(Arc::new(definition));
        self
    }

    pub fn with(mut self, definition: impl MigrationDefinition + 'static) -> Self {
        self.register(definition);
        self
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl MigrationSource for Registry {
    fn list_all(&self) -> Result<Vec<SharedDefinition>> {
        for definition in &self.definitions {
            validate_name(definition.name()).map_err(|message| Error::Definition {
                artifact: format!("registered migration {}", definition.id()),
                message,
            })?;
        }
        sorted_unique(self.definitions.clone())
    }
}

/// Several sources presented as one, e.g. SQL files plus registered code.
#[derive(Default)]
pub struct CompositeSource {
    sources: Vec<Box<dyn MigrationSource>>,
}

impl CompositeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl MigrationSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl MigrationSource for CompositeSource {
    fn list_all(&self) -> Result<Vec<SharedDefinition>> {
        let mut all = Vec::new();
        for source in &self.sources {
            all.extend(source.list_all()?);
        }
        sorted_unique(all)
    }
}

fn sorted_unique(mut definitions: Vec<SharedDefinition>) -> Result<Vec<SharedDefinition>> {
    definitions.sort_by_key(|d| d.id());
    if let Some(pair) = definitions.windows(2).find(|w| w[0].id() == w[1].id()) {
        return Err(Error::Definition {
            artifact: format!("migration {}", pair[1].id()),
            message: format!(
                "duplicate migration id {} shared by '{}' and '{}'",
                pair[1].id(),
                pair[0].name(),
                pair[1].name()
            ),
        });
    }
    Ok(definitions)
}
