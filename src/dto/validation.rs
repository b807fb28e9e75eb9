//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that an identifier (player or match id) is printable and free of whitespace.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("player-42")        // Ok
/// validate_identifier("quiz:1718:ab12cd") // Ok
/// validate_identifier("bad id")           // Err - whitespace
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        let mut err = ValidationError::new("identifier_empty");
        err.message = Some("Identifier must not be empty".into());
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("Identifier must not contain whitespace or control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("alice").is_ok());
        assert!(validate_identifier("quiz:1718000000000:ab12cd").is_ok());
        assert!(validate_identifier("64f1c2e9a7").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("two words").is_err());
        assert!(validate_identifier("tab\there").is_err());
        assert!(validate_identifier("line\nbreak").is_err());
    }
}
