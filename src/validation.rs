use crate::error::{AppError, Result};

/// Longest identifier Postgres keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Instance and role names end up unquoted in SQL and as directory names,
/// so only plain identifiers are accepted. Postgres folds unquoted
/// identifiers to lowercase, so uppercase is refused.
fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn validate_instance_name(name: &str) -> Result<()> {
    if !is_plain_identifier(name) {
        return Err(AppError::invalid_name(name));
    }
    Ok(())
}

pub fn validate_role_name(user: &str) -> Result<()> {
    if !is_plain_identifier(user) {
        return Err(AppError::invalid_name(user).with("field", "db_user"));
    }
    Ok(())
}
