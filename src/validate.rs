use crate::constants::{MAX_COLLECTION_NAME_LENGTH, MAX_EMAIL_LENGTH, MIN_PASSWORD_LENGTH};
use crate::error::AppError;

/// Validate a collection name: it becomes a table identifier, so only
/// `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn validate_collection_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(format!(
            "Collection name must be between 1 and {} characters",
            MAX_COLLECTION_NAME_LENGTH
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("Collection name '{}' is not a plain identifier", name));
    }
    Ok(())
}

/// Validate a dotted document field path such as `auth.isBlocked`.
pub fn validate_field_path(path: &str) -> Result<(), AppError> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if !valid {
        return Err(AppError::BadRequest(format!(
            "Invalid field path '{}'",
            path
        )));
    }
    Ok(())
}

/// Validate an email address with a basic check.
pub fn validate_email(email: &str) -> Result<(), AppError> {
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(AppError::BadRequest("Email address too long".to_string()));
    }
    let parts: Vec<&str> = email.splitn(2, '@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() || !parts[1].contains('.') {
        return Err(AppError::BadRequest(
            "Invalid email address format".to_string(),
        ));
    }
    Ok(())
}

/// Validate password strength.
pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Collection names ───────────────────────────────────────────────

    #[test]
    fn test_valid_collection_names() {
        assert!(validate_collection_name("accounts").is_ok());
        assert!(validate_collection_name("_audit_log2").is_ok());
    }

    #[test]
    fn test_collection_name_injection() {
        assert!(validate_collection_name("accounts; DROP TABLE x").is_err());
        assert!(validate_collection_name("acc\"ounts").is_err());
    }

    #[test]
    fn test_collection_name_leading_digit() {
        assert!(validate_collection_name("1accounts").is_err());
    }

    #[test]
    fn test_collection_name_too_long() {
        assert!(validate_collection_name(&"a".repeat(64)).is_err());
        assert!(validate_collection_name("").is_err());
    }

    // ── Field paths ────────────────────────────────────────────────────

    #[test]
    fn test_valid_field_paths() {
        assert!(validate_field_path("email").is_ok());
        assert!(validate_field_path("auth.isBlocked").is_ok());
        assert!(validate_field_path("_id").is_ok());
    }

    #[test]
    fn test_field_path_empty_segment() {
        assert!(validate_field_path("auth..isBlocked").is_err());
        assert!(validate_field_path(".email").is_err());
        assert!(validate_field_path("").is_err());
    }

    #[test]
    fn test_field_path_operator_chars() {
        assert!(validate_field_path("$where").is_err());
        assert!(validate_field_path("name'--").is_err());
    }

    // ── Email ──────────────────────────────────────────────────────────

    #[test]
    fn test_valid_email() {
        assert!(validate_email("user@example.com").is_ok());
    }

    #[test]
    fn test_email_no_at() {
        assert!(validate_email("userexample.com").is_err());
    }

    #[test]
    fn test_email_no_domain_dot() {
        assert!(validate_email("user@example").is_err());
    }

    #[test]
    fn test_email_empty_local() {
        assert!(validate_email("@example.com").is_err());
    }

    #[test]
    fn test_email_too_long() {
        let long_email = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long_email).is_err());
    }

    // ── Password ───────────────────────────────────────────────────────

    #[test]
    fn test_password_too_short() {
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_password_long_enough() {
        assert!(validate_password("correct horse").is_ok());
    }
}
