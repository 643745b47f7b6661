//! Store key layout for counter records.

/// Hash field holding the number of admitted requests in the current window
pub const COUNT_FIELD: &str = "ct";

/// Hash field holding the ceiling applied to the current window
pub const LIMIT_FIELD: &str = "lt";

/// Build the store key for an identity under one strategy.
///
/// Identities never contain `:` (see `RequestValidator::validate_identity`),
/// so distinct pairs always map to distinct keys.
pub fn counter_key(identity: &str, strategy_id: &str) -> String {
    format!("{}:{}", identity, strategy_id)
}
