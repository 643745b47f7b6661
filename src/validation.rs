use crate::error::ThrottlerError;
use regex::Regex;
use std::sync::LazyLock;

/// Longest identity accepted by the limiter
pub const MAX_IDENTITY_LEN: usize = 128;

static IDENTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.@-]+$").expect("identity pattern is a valid regex")
});

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Validates the identity being rate limited.
    ///
    /// The `:` separator of counter keys is excluded, which keeps the key
    /// mapping injective.
    pub fn validate_identity(identity: &str) -> Result<(), ThrottlerError> {
        if identity.is_empty() {
            return Err(ThrottlerError::Validation(
                "Identity cannot be empty".to_string(),
            ));
        }

        if identity.len() > MAX_IDENTITY_LEN {
            return Err(ThrottlerError::Validation(format!(
                "Identity cannot be longer than {} characters",
                MAX_IDENTITY_LEN
            )));
        }

        if !IDENTITY_PATTERN.is_match(identity) {
            return Err(ThrottlerError::Validation(
                "Identity can only contain alphanumeric characters, '-', '_', '@' and '.'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a new max count for a strategy
    pub fn validate_limit(limit: u64) -> Result<(), ThrottlerError> {
        if limit == 0 {
            return Err(ThrottlerError::Validation(
                "Limit must be greater than 0".to_string(),
            ));
        }

        if limit > i64::MAX as u64 {
            return Err(ThrottlerError::Validation(
                "Limit does not fit the store's integer range".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identities() {
        for identity in ["lijunshi", "user-123", "a.b@example.com", "238918319", "x_y"] {
            assert!(RequestValidator::validate_identity(identity).is_ok(), "{}", identity);
        }
    }

    #[test]
    fn test_invalid_identities() {
        let too_long = "a".repeat(MAX_IDENTITY_LEN + 1);
        for identity in ["", "user:1", "has space", "tab\t", too_long.as_str()] {
            assert!(matches!(
                RequestValidator::validate_identity(identity),
                Err(ThrottlerError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_validate_limit() {
        assert!(RequestValidator::validate_limit(1).is_ok());
        assert!(RequestValidator::validate_limit(0).is_err());
        assert!(RequestValidator::validate_limit(u64::MAX).is_err());
    }
}
