use crate::error::{ThrottlerError, ThrottlerResult};
use crate::evaluator::{AtomicEvaluator, EvaluationOutcome};
use crate::key_generator::{counter_key, COUNT_FIELD, LIMIT_FIELD};
use crate::store::CounterStore;
use crate::strategy::{parse_strategy_id, Strategy, StrategySet};
use crate::validation::RequestValidator;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Current usage of one identity under one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub used: u64,
    pub total: u64,
}

/// Multi-window fixed-window limiter shared through a counter store
pub struct Limiter {
    strategies: RwLock<StrategySet>,
    evaluator: AtomicEvaluator,
    store: Arc<dyn CounterStore>,
}

impl Limiter {
    /// Create a limiter, registering the evaluation script with the store
    pub async fn new(store: Arc<dyn CounterStore>, strategies: StrategySet) -> ThrottlerResult<Self> {
        let evaluator = AtomicEvaluator::new(store.clone()).await?;

        info!(
            target: "fixed_window_limiter::limiter",
            store = store.name(),
            strategies = strategies.len(),
            "Limiter ready"
        );

        Ok(Self {
            strategies: RwLock::new(strategies),
            evaluator,
            store,
        })
    }

    /// Count one request for `identity` against every configured strategy
    pub async fn check(&self, identity: &str) -> ThrottlerResult<EvaluationOutcome> {
        RequestValidator::validate_identity(identity)?;

        let strategies = self.strategies.read().await.snapshot();
        let outcome = self.evaluator.evaluate(identity, &strategies).await?;

        debug!(
            target: "fixed_window_limiter::limiter",
            identity = %identity,
            reached = outcome.reached,
            strategy = %outcome.triggering_strategy_id,
            used = outcome.used,
            total = outcome.total,
            "Evaluated request"
        );

        Ok(outcome)
    }

    /// Change a strategy's max count and apply it to the identity's current window
    pub async fn set_limit(&self, identity: &str, strategy_id: &str, new_max: u64) -> ThrottlerResult<()> {
        RequestValidator::validate_identity(identity)?;
        parse_strategy_id(strategy_id)?;
        RequestValidator::validate_limit(new_max)?;

        // The store write lands before the config change; a failed write leaves both untouched.
        let mut strategies = self.strategies.write().await;
        let window = strategies
            .get(strategy_id)
            .map(|s| s.window)
            .ok_or_else(|| {
                ThrottlerError::InvalidStrategy(format!(
                    "Strategy '{}' is not configured",
                    strategy_id
                ))
            })?;

        let key = counter_key(identity, strategy_id);
        let updated_record = self
            .store
            .write_field(&key, LIMIT_FIELD, &new_max.to_string())
            .await?;
        strategies.add_or_update(strategy_id, new_max, window)?;
        drop(strategies);

        info!(
            target: "fixed_window_limiter::limiter",
            identity = %identity,
            strategy = %strategy_id,
            limit = new_max,
            updated_record,
            "Limit updated"
        );

        Ok(())
    }

    /// Stop evaluating a strategy and drop the identity's record for it
    pub async fn remove_limit(&self, identity: &str, strategy_id: &str) -> ThrottlerResult<()> {
        RequestValidator::validate_identity(identity)?;
        parse_strategy_id(strategy_id)?;

        let mut strategies = self.strategies.write().await;
        let key = counter_key(identity, strategy_id);
        let deleted_record = self.store.delete_key(&key).await?;
        let removed = strategies.remove(strategy_id).is_some();
        drop(strategies);

        info!(
            target: "fixed_window_limiter::limiter",
            identity = %identity,
            strategy = %strategy_id,
            removed,
            deleted_record,
            "Limit removed"
        );

        Ok(())
    }

    /// Read the identity's usage under one strategy without counting a request
    pub async fn inspect(&self, identity: &str, strategy_id: &str) -> ThrottlerResult<Usage> {
        RequestValidator::validate_identity(identity)?;
        parse_strategy_id(strategy_id)?;

        let key = counter_key(identity, strategy_id);
        let fields = self
            .store
            .read_fields(&key, &[COUNT_FIELD, LIMIT_FIELD])
            .await?;

        match fields.as_slice() {
            [Some(used), Some(total)] => Ok(Usage {
                used: parse_stored(&key, COUNT_FIELD, used)?,
                total: parse_stored(&key, LIMIT_FIELD, total)?,
            }),
            [_, _] => Err(ThrottlerError::NoRecord(key)),
            other => Err(ThrottlerError::Protocol(format!(
                "Expected 2 fields for '{}', got {}",
                key,
                other.len()
            ))),
        }
    }

    /// Insert a strategy, or replace the one with the same id
    pub async fn add_strategy(&self, strategy: Strategy) -> ThrottlerResult<()> {
        self.strategies
            .write()
            .await
            .add_or_update(&strategy.id, strategy.max_count, strategy.window)?;

        info!(
            target: "fixed_window_limiter::limiter",
            strategy = %strategy,
            "Strategy added"
        );
        Ok(())
    }

    /// Configured strategies in evaluation order
    pub async fn strategies(&self) -> Vec<Strategy> {
        self.strategies.read().await.snapshot()
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

fn parse_stored(key: &str, field: &str, value: &str) -> ThrottlerResult<u64> {
    value.parse().map_err(|_| {
        ThrottlerError::Protocol(format!(
            "Field '{}' of '{}' is not a count: {:?}",
            field, key, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ReplyValue};
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    /// Evaluates normally but fails every record write or delete
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl CounterStore for ReadOnlyStore {
        async fn register_procedure(&self, body: &str) -> ThrottlerResult<String> {
            self.inner.register_procedure(body).await
        }

        async fn invoke_procedure(
            &self,
            handle: &str,
            keys: &[String],
            args: &[String],
        ) -> ThrottlerResult<ReplyValue> {
            self.inner.invoke_procedure(handle, keys, args).await
        }

        async fn read_fields(&self, key: &str, fields: &[&str]) -> ThrottlerResult<Vec<Option<String>>> {
            self.inner.read_fields(key, fields).await
        }

        async fn write_field(&self, _key: &str, _field: &str, _value: &str) -> ThrottlerResult<bool> {
            Err(ThrottlerError::Store("READONLY replica".to_string()))
        }

        async fn delete_key(&self, _key: &str) -> ThrottlerResult<bool> {
            Err(ThrottlerError::Store("READONLY replica".to_string()))
        }

        fn name(&self) -> &'static str {
            "read-only"
        }
    }

    async fn limiter(ids: &[&str]) -> (Arc<MemoryStore>, Limiter) {
        let store = Arc::new(MemoryStore::new());
        let strategies =
            StrategySet::new(ids.iter().map(|id| id.parse().unwrap()).collect()).unwrap();
        let limiter = Limiter::new(store.clone(), strategies).await.unwrap();
        (store, limiter)
    }

    #[tokio::test]
    async fn test_check_counts_every_strategy() {
        let (_, limiter) = limiter(&["5-S", "10-M"]).await;

        let outcome = limiter.check("u1").await.unwrap();
        assert!(!outcome.reached);

        assert_eq!(
            limiter.inspect("u1", "5-S").await.unwrap(),
            Usage { used: 1, total: 5 }
        );
        assert_eq!(
            limiter.inspect("u1", "10-M").await.unwrap(),
            Usage { used: 1, total: 10 }
        );
    }

    #[tokio::test]
    async fn test_check_rejects_invalid_identity() {
        let (store, limiter) = limiter(&["5-S"]).await;
        let err = limiter.check("bad:identity").await.unwrap_err();
        assert!(matches!(err, ThrottlerError::Validation(_)));
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_set_limit_requires_configured_strategy() {
        let (_, limiter) = limiter(&["5-S"]).await;

        assert!(matches!(
            limiter.set_limit("u1", "10-M", 20).await,
            Err(ThrottlerError::InvalidStrategy(_))
        ));
        assert!(matches!(
            limiter.set_limit("u1", "10-W", 20).await,
            Err(ThrottlerError::UnknownPeriod(_))
        ));
        assert!(matches!(
            limiter.set_limit("u1", "ten-M", 20).await,
            Err(ThrottlerError::Format(_))
        ));
        assert!(matches!(
            limiter.set_limit("u1", "5-S", 0).await,
            Err(ThrottlerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_set_limit_without_record_only_updates_config() {
        let (store, limiter) = limiter(&["5-S"]).await;

        assert_ok!(limiter.set_limit("u1", "5-S", 7).await);
        assert_eq!(store.record_count().await, 0);
        assert_eq!(limiter.strategies().await[0].max_count, 7);

        limiter.check("u1").await.unwrap();
        assert_eq!(
            limiter.inspect("u1", "5-S").await.unwrap(),
            Usage { used: 1, total: 7 }
        );
    }

    #[tokio::test]
    async fn test_inspect_errors() {
        let (_, limiter) = limiter(&["5-S"]).await;

        assert!(matches!(
            limiter.inspect("u1", "5-S").await,
            Err(ThrottlerError::NoRecord(key)) if key == "u1:5-S"
        ));
        assert!(matches!(
            limiter.inspect("u1", "Week").await,
            Err(ThrottlerError::UnknownPeriod(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_limit_drops_strategy_and_record() {
        let (_, limiter) = limiter(&["5-S", "10-M"]).await;
        limiter.check("u1").await.unwrap();

        assert_ok!(limiter.remove_limit("u1", "10-M").await);
        assert_eq!(limiter.strategies().await.len(), 1);
        assert_err!(limiter.inspect("u1", "10-M").await);

        limiter.check("u1").await.unwrap();
        assert_err!(limiter.inspect("u1", "10-M").await);
        assert_eq!(limiter.inspect("u1", "5-S").await.unwrap().used, 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_strategy_is_noop() {
        let (_, limiter) = limiter(&["5-S"]).await;
        assert_ok!(limiter.remove_limit("u1", "Hour").await);
        assert_eq!(limiter.strategies().await.len(), 1);
        assert!(matches!(
            limiter.remove_limit("u1", "5-X").await,
            Err(ThrottlerError::UnknownPeriod(_))
        ));
    }

    #[tokio::test]
    async fn test_add_strategy_at_runtime() {
        let (_, limiter) = limiter(&["5-S"]).await;
        limiter
            .add_strategy(Strategy::with_max("Minute", 2).unwrap())
            .await
            .unwrap();

        limiter.check("u1").await.unwrap();
        limiter.check("u1").await.unwrap();
        let outcome = limiter.check("u1").await.unwrap();
        assert_eq!(outcome, EvaluationOutcome::rejected("Minute", 2, 2));
    }

    #[tokio::test]
    async fn test_failed_store_write_keeps_strategies() {
        let store = Arc::new(ReadOnlyStore {
            inner: MemoryStore::new(),
        });
        let strategies = StrategySet::new(vec!["5-S".parse().unwrap()]).unwrap();
        let limiter = Limiter::new(store, strategies).await.unwrap();
        limiter.check("u1").await.unwrap();

        assert!(matches!(
            limiter.set_limit("u1", "5-S", 10).await,
            Err(ThrottlerError::Store(_))
        ));
        assert_eq!(limiter.strategies().await[0].max_count, 5);

        assert!(matches!(
            limiter.remove_limit("u1", "5-S").await,
            Err(ThrottlerError::Store(_))
        ));
        assert_eq!(limiter.strategies().await.len(), 1);
        assert_eq!(
            limiter.inspect("u1", "5-S").await.unwrap(),
            Usage { used: 1, total: 5 }
        );
    }
}
