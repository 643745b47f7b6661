//! Counter store abstraction.
//!
//! The limiter only needs five operations from the shared store: register a
//! server-side procedure, invoke it, and read, update or delete a single
//! counter record. Everything that must be atomic across service instances
//! happens inside the registered procedure.

pub mod memory;
pub mod redis_store;

use crate::error::ThrottlerResult;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Store-neutral reply of a procedure invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    Nil,
    Int(i64),
    Text(String),
    Array(Vec<ReplyValue>),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Register a procedure body and return the handle used to invoke it
    async fn register_procedure(&self, body: &str) -> ThrottlerResult<String>;

    /// Run a registered procedure atomically.
    ///
    /// Fails with a `Store` error prefixed by `NOSCRIPT` when the handle is
    /// not (or no longer) registered.
    async fn invoke_procedure(
        &self,
        handle: &str,
        keys: &[String],
        args: &[String],
    ) -> ThrottlerResult<ReplyValue>;

    /// Read hash fields of a record; missing records or fields read as `None`
    async fn read_fields(&self, key: &str, fields: &[&str]) -> ThrottlerResult<Vec<Option<String>>>;

    /// Overwrite one field of a live record. Returns `false` without writing
    /// when no record exists.
    async fn write_field(&self, key: &str, field: &str, value: &str) -> ThrottlerResult<bool>;

    /// Delete a record, returning whether one existed
    async fn delete_key(&self, key: &str) -> ThrottlerResult<bool>;

    /// Round-trip check used by the health endpoint
    async fn ping(&self) -> ThrottlerResult<()> {
        Ok(())
    }

    /// Short label used in logs and health output
    fn name(&self) -> &'static str;
}
