use crate::error::ThrottlerError;
use crate::strategy::Strategy;
use std::collections::HashSet;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL; an empty URL selects the in-process store
    pub fn validate_redis_url(url: &str) -> Result<(), ThrottlerError> {
        if url.is_empty() {
            return Ok(());
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ThrottlerError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates that strategy ids are unique
    pub fn validate_strategies(strategies: &[Strategy]) -> Result<(), ThrottlerError> {
        let mut seen = HashSet::new();
        for strategy in strategies {
            if !seen.insert(strategy.id.as_str()) {
                return Err(ThrottlerError::InvalidStrategy(format!(
                    "Strategy '{}' is configured more than once",
                    strategy.id
                )));
            }
        }

        if strategies.is_empty() {
            tracing::warn!("No strategies configured, every request will be admitted");
        }

        Ok(())
    }
}
