//! Cached handle for the registered evaluation procedure.

use crate::error::ThrottlerResult;
use crate::store::{CounterStore, ReplyValue};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CachedHandle {
    handle: String,
    /// Bumped on every reload so concurrent callers reload at most once
    generation: u64,
}

/// Holds the store's handle for a procedure body and re-registers the body
/// whenever the store stops recognizing the handle (restart, script flush,
/// or a cluster node that never saw the registration).
pub struct ProcedureCache {
    store: Arc<dyn CounterStore>,
    body: &'static str,
    cached: RwLock<CachedHandle>,
}

impl ProcedureCache {
    pub async fn new(store: Arc<dyn CounterStore>, body: &'static str) -> ThrottlerResult<Self> {
        let handle = store.register_procedure(body).await?;
        debug!(
            target: "fixed_window_limiter::procedure",
            handle = %handle,
            store = store.name(),
            "Registered procedure"
        );

        Ok(Self {
            store,
            body,
            cached: RwLock::new(CachedHandle {
                handle,
                generation: 0,
            }),
        })
    }

    pub async fn handle(&self) -> String {
        self.cached.read().await.handle.clone()
    }

    /// Invoke the procedure, reloading it and retrying once if the handle is stale.
    pub async fn invoke(&self, keys: &[String], args: &[String]) -> ThrottlerResult<ReplyValue> {
        let current = self.cached.read().await.clone();

        match self.store.invoke_procedure(&current.handle, keys, args).await {
            Err(err) if err.is_unknown_procedure() => {
                warn!(
                    target: "fixed_window_limiter::procedure",
                    handle = %current.handle,
                    error = %err,
                    "Procedure handle not recognized by store, reloading"
                );
                let handle = self.reload(current.generation).await?;
                self.store.invoke_procedure(&handle, keys, args).await
            }
            other => other,
        }
    }

    /// Re-register the body unless another caller already did so after
    /// `observed_generation` was read.
    async fn reload(&self, observed_generation: u64) -> ThrottlerResult<String> {
        let mut cached = self.cached.write().await;
        if cached.generation != observed_generation {
            return Ok(cached.handle.clone());
        }

        let handle = self.store.register_procedure(self.body).await?;
        cached.handle = handle.clone();
        cached.generation += 1;
        debug!(
            target: "fixed_window_limiter::procedure",
            handle = %handle,
            generation = cached.generation,
            "Reloaded procedure"
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottlerError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the memory store and counts registrations
    struct CountingStore {
        inner: MemoryStore,
        registrations: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for CountingStore {
        async fn register_procedure(&self, body: &str) -> ThrottlerResult<String> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
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

        async fn write_field(&self, key: &str, field: &str, value: &str) -> ThrottlerResult<bool> {
            self.inner.write_field(key, field, value).await
        }

        async fn delete_key(&self, key: &str) -> ThrottlerResult<bool> {
            self.inner.delete_key(key).await
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    /// Store whose procedures are never found
    struct AmnesiacStore;

    #[async_trait]
    impl CounterStore for AmnesiacStore {
        async fn register_procedure(&self, _body: &str) -> ThrottlerResult<String> {
            Ok("forgotten".to_string())
        }

        async fn invoke_procedure(
            &self,
            _handle: &str,
            _keys: &[String],
            _args: &[String],
        ) -> ThrottlerResult<ReplyValue> {
            Err(ThrottlerError::Store("NOSCRIPT No matching script".to_string()))
        }

        async fn read_fields(&self, _key: &str, fields: &[&str]) -> ThrottlerResult<Vec<Option<String>>> {
            Ok(vec![None; fields.len()])
        }

        async fn write_field(&self, _key: &str, _field: &str, _value: &str) -> ThrottlerResult<bool> {
            Ok(false)
        }

        async fn delete_key(&self, _key: &str) -> ThrottlerResult<bool> {
            Ok(false)
        }

        fn name(&self) -> &'static str {
            "amnesiac"
        }
    }

    fn call() -> (Vec<String>, Vec<String>) {
        (
            vec!["u1:5-S".to_string()],
            vec!["5".to_string(), "1000".to_string()],
        )
    }

    #[tokio::test]
    async fn test_reload_after_flush() {
        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            registrations: AtomicUsize::new(0),
        });
        let cache = ProcedureCache::new(store.clone(), "body").await.unwrap();
        let first_handle = cache.handle().await;

        store.inner.flush_procedures().await;
        let (keys, args) = call();
        assert!(cache.invoke(&keys, &args).await.is_ok());

        assert_eq!(store.registrations.load(Ordering::SeqCst), 2);
        assert_ne!(cache.handle().await, first_handle);
    }

    #[tokio::test]
    async fn test_concurrent_reloads_register_once() {
        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            registrations: AtomicUsize::new(0),
        });
        let cache = Arc::new(ProcedureCache::new(store.clone(), "body").await.unwrap());
        store.inner.flush_procedures().await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let (keys, args) = call();
                cache.invoke(&keys, &args).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        // one registration at construction, at most one per stale generation
        assert_eq!(store.registrations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_surfaced() {
        let cache = ProcedureCache::new(Arc::new(AmnesiacStore), "body")
            .await
            .unwrap();
        let (keys, args) = call();
        let err = cache.invoke(&keys, &args).await.unwrap_err();
        assert!(matches!(err, ThrottlerError::Store(_)));
    }
}
