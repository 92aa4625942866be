use strata_common::MigrationId;

/// Separates the id from the slug in a migration filename.
pub const DELIMITER: &str = "___";

pub const EXTENSION: &str = "sql";

const NAME_MIN: usize = 3;
const NAME_MAX: usize = 128;

pub fn validate_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&len) {
        return Err(format!(
            "name must be {NAME_MIN}-{NAME_MAX} characters long, got {len}"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
    {
        return Err(format!(
            "name '{name}' may only contain letters, digits, spaces, hyphens and underscores"
        ));
    }
    Ok(())
}

/// Filename-safe form of a migration name. Cosmetic only.
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, ' ' | '-') { '_' } else { c })
        .collect()
}

/// Human label recovered from a slug: `add_users` becomes `Add users`.
pub fn humanize(slug: &str) -> String {
    let spaced = slug.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn artifact_filename(id: MigrationId, name: &str) -> String {
    format!("{id}{DELIMITER}{}.{EXTENSION}", slugify(name))
}

/// Split `<id>___<slug>.sql` into its id and slug.
pub fn parse_artifact_filename(filename: &str) -> Result<(MigrationId, String), String> {
    let base = filename
        .strip_suffix(EXTENSION)
        .and_then(|b| b.strip_suffix('.'))
        .ok_or_else(|| format!("expected format <id>{DELIMITER}<slug>.{EXTENSION}"))?;

    let (id_str, slug) = base
        .split_once(DELIMITER)
        .ok_or_else(|| format!("expected format <id>{DELIMITER}<slug>.{EXTENSION}"))?;

    if id_str.is_empty() || !id_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("id '{id_str}' must be a non-negative integer"));
    }
    let id: MigrationId = id_str
        .parse()
        .map_err(|e| format!("id '{id_str}' is not a valid integer: {e}"))?;

    if slug.is_empty() {
        return Err("slug must not be empty".to_string());
    }

    Ok((id, slug.to_string()))
}
