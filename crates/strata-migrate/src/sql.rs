use strata_common::{Error, MigrationId, Result};
use strata_db::SqlExecutor;

use crate::definition::MigrationDefinition;
use crate::naming::{humanize, validate_name};

const SECTION_PREFIX: &str = "-- migrate:";
const NAME_PREFIX: &str = "-- name:";
const DESCRIPTION_PREFIX: &str = "-- description:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    BeforeUp,
    Up,
    AfterUp,
    BeforeDown,
    Down,
    AfterDown,
}

impl Section {
    fn parse(marker: &str) -> Option<Self> {
        match marker {
            "before-up" => Some(Section::BeforeUp),
            "up" => Some(Section::Up),
            "after-up" => Some(Section::AfterUp),
            "before-down" => Some(Section::BeforeDown),
            "down" => Some(Section::Down),
            "after-down" => Some(Section::AfterDown),
            _ => None,
        }
    }
}

/// A migration defined by a plain SQL file.
///
/// ```sql
/// -- name: Create users
/// -- description: Adds the users table
/// -- migrate:up
/// CREATE TABLE users (id INTEGER PRIMARY KEY);
/// -- migrate:down
/// DROP TABLE users;
/// ```
///
/// Optional `before-up`, `after-up`, `before-down` and `after-down` sections
/// become the hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    id: MigrationId,
    name: String,
    description: String,
    before_up: Option<String>,
    up: String,
    after_up: Option<String>,
    before_down: Option<String>,
    down: Option<String>,
    after_down: Option<String>,
}

impl SqlMigration {
    pub fn new(id: MigrationId, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            before_up: None,
            up: up.into(),
            after_up: None,
            before_down: None,
            down: None,
            after_down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parse the contents of `<id>___<slug>.sql`. The name falls back to the
    /// humanized slug when the file has no `-- name:` header.
    pub fn parse(id: MigrationId, slug: &str, contents: &str) -> std::result::Result<Self, String> {
        let mut name: Option<String> = None;
        let mut description: Vec<String> = Vec::new();
        let mut sections: Vec<(Section, String)> = Vec::new();

        for (lineno, line) in contents.lines().enumerate() {
            let trimmed = line.trim();

            if let Some(marker) = trimmed.strip_prefix(SECTION_PREFIX) {
                let marker = marker.trim();
                let section = Section::parse(marker)
                    .ok_or_else(|| format!("line {}: unknown section '{marker}'", lineno + 1))?;
                if sections.iter().any(|(s, _)| *s == section) {
                    return Err(format!("line {}: section '{marker}' repeated", lineno + 1));
                }
                sections.push((section, String::new()));
                continue;
            }

            if let Some((_, body)) = sections.last_mut() {
                body.push_str(line);
                body.push('\n');
                continue;
            }

            // header, before the first section
            if let Some(value) = trimmed.strip_prefix(NAME_PREFIX) {
                name = Some(value.trim().to_string());
            } else if let Some(value) = trimmed.strip_prefix(DESCRIPTION_PREFIX) {
                description.push(value.trim().to_string());
            } else if !trimmed.is_empty() && !trimmed.starts_with("--") {
                return Err(format!(
                    "line {}: statement outside of a '{SECTION_PREFIX}' section",
                    lineno + 1
                ));
            }
        }

        let name = name.unwrap_or_else(|| humanize(slug));
        validate_name(&name)?;

        let mut take = |wanted: Section| {
            sections
                .iter()
                .position(|(s, _)| *s == wanted)
                .map(|i| sections.remove(i).1)
        };

        let up = take(Section::Up).ok_or_else(|| format!("missing '{SECTION_PREFIX}up' section"))?;

        Ok(Self {
            id,
            name,
            description: description.join(" "),
            before_up: take(Section::BeforeUp),
            up,
            after_up: take(Section::AfterUp),
            before_down: take(Section::BeforeDown),
            down: take(Section::Down),
            after_down: take(Section::AfterDown),
        })
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

fn run(sql: &dyn SqlExecutor, body: Option<&str>) -> Result<()> {
    match body {
        Some(body) if !body.trim().is_empty() => sql.execute(body),
        _ => Ok(()),
    }
}

impl MigrationDefinition for SqlMigration {
    fn id(&self) -> MigrationId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn apply(&self, sql: &dyn SqlExecutor) -> Result<()> {
        run(sql, Some(&self.up))
    }

    fn revert(&self, sql: &dyn SqlExecutor) -> Result<()> {
        match &self.down {
            Some(down) => run(sql, Some(down)),
            None => Err(Error::Other(format!(
                "migration {} is irreversible: it has no down section",
                self.id
            ))),
        }
    }

    fn before_apply(&self, sql: &dyn SqlExecutor) -> Result<()> {
        run(sql, self.before_up.as_deref())
    }

    fn after_apply(&self, sql: &dyn SqlExecutor) -> Result<()> {
        run(sql, self.after_up.as_deref())
    }

    fn before_revert(&self, sql: &dyn SqlExecutor) -> Result<()> {
        run(sql, self.before_down.as_deref())
    }

    fn after_revert(&self, sql: &dyn SqlExecutor) -> Result<()> {
        run(sql, self.after_down.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::Database;

    const USERS: &str = "-- name: Create users
-- description: Adds the users table
-- for the accounts service

-- migrate:up
CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);
-- migrate:after-up
CREATE INDEX idx_users_email ON users(email);
-- migrate:down
DROP TABLE users;
";

    #[test]
    fn parses_header_and_sections() {
        let m = SqlMigration::parse(MigrationId::new(10), "create_users", USERS).unwrap();
        assert_eq!(m.name(), "Create users");
        assert_eq!(m.description(), "Adds the users table");
        assert!(m.up.contains("CREATE TABLE users"));
        assert!(m.after_up.as_deref().unwrap().contains("CREATE INDEX"));
        assert!(m.before_up.is_none());
        assert!(m.is_reversible());
    }

    #[test]
    fn name_defaults_to_humanized_slug() {
        let m = SqlMigration::parse(MigrationId::new(1), "add_orders", "-- migrate:up\nSELECT 1;")
            .unwrap();
        assert_eq!(m.name(), "Add orders");
        assert_eq!(m.description(), "");
        assert!(!m.is_reversible());
    }

    #[test]
    fn rejects_malformed_files() {
        let id = MigrationId::new(1);
        assert!(SqlMigration::parse(id, "x_y_z", "CREATE TABLE t (id INT);").is_err());
        assert!(SqlMigration::parse(id, "x_y_z", "-- migrate:down\nDROP TABLE t;").is_err());
        assert!(SqlMigration::parse(id, "x_y_z", "-- migrate:up\n-- migrate:up\n").is_err());
        assert!(SqlMigration::parse(id, "x_y_z", "-- migrate:sideways\n").is_err());
        assert!(SqlMigration::parse(id, "x_y_z", "-- name: !!\n-- migrate:up\n").is_err());
    }

    #[test]
    fn applies_and_reverts_against_sqlite() {
        let db = Database::in_memory().unwrap();
        let m = SqlMigration::parse(MigrationId::new(10), "create_users", USERS).unwrap();

        m.before_apply(&db).unwrap();
        m.apply(&db).unwrap();
        m.after_apply(&db).unwrap();
        assert!(db.table_exists("users").unwrap());
        assert!(db
            .query_exists("SELECT 1 FROM sqlite_master WHERE name = 'idx_users_email'")
            .unwrap());

        m.revert(&db).unwrap();
        assert!(!db.table_exists("users").unwrap());
    }

    #[test]
    fn irreversible_migration_fails_to_revert() {
        let db = Database::in_memory().unwrap();
        let m = SqlMigration::new(MigrationId::new(3), "One way", "SELECT 1;");
        assert!(m.revert(&db).is_err());
    }
}
