use super::{CounterStore, ReplyValue};
use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script, Value};

/// Updates a hash field only while the record is alive, so a limit change
/// never leaves behind a record without TTL.
const WRITE_LIVE_FIELD_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

/// Counter store backed by a Redis server, cluster proxy or ring node
pub struct RedisStore {
    connection: ConnectionManager,
    write_live_field: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> ThrottlerResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| ThrottlerError::Store(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| ThrottlerError::Store(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(target: "fixed_window_limiter::store", "Connected to Redis");

        Ok(Self {
            connection,
            write_live_field: Script::new(WRITE_LIVE_FIELD_SCRIPT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn to_reply(value: Value) -> ReplyValue {
    match value {
        Value::Nil => ReplyValue::Nil,
        Value::Int(n) => ReplyValue::Int(n),
        Value::Data(bytes) => ReplyValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Bulk(items) => ReplyValue::Array(items.into_iter().map(to_reply).collect()),
        Value::Status(status) => ReplyValue::Text(status),
        Value::Okay => ReplyValue::Text("OK".to_string()),
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn register_procedure(&self, body: &str) -> ThrottlerResult<String> {
        let mut conn = self.connection();
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(body)
            .query_async(&mut conn)
            .await?;
        Ok(sha)
    }

    async fn invoke_procedure(
        &self,
        handle: &str,
        keys: &[String],
        args: &[String],
    ) -> ThrottlerResult<ReplyValue> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(handle).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }

        let value: Value = cmd.query_async(&mut conn).await?;
        Ok(to_reply(value))
    }

    async fn read_fields(&self, key: &str, fields: &[&str]) -> ThrottlerResult<Vec<Option<String>>> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }

        let values: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
        Ok(values)
    }

    async fn write_field(&self, key: &str, field: &str, value: &str) -> ThrottlerResult<bool> {
        let mut conn = self.connection();
        let updated: i64 = self
            .write_live_field
            .key(key)
            .arg(field)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn delete_key(&self, key: &str) -> ThrottlerResult<bool> {
        let mut conn = self.connection();
        let deleted: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
