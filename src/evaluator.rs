//! Atomic evaluation of every configured window for one identity.
//!
//! All windows are checked and incremented by a single server-side script so
//! concurrent callers for the same identity can never both slip past a limit.
//! The script walks the keys in order and stops at the first exhausted
//! record. Windows ordered before that record have already been incremented
//! on that call and keep the increment; windows after it are not touched.

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::key_generator::counter_key;
use crate::procedure::ProcedureCache;
use crate::store::{CounterStore, ReplyValue};
use crate::strategy::Strategy;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// KEYS[i]: `<identity>:<strategy id>` hash with fields `ct` (count) and `lt` (limit)
/// ARGV[2i-1], ARGV[2i]: max count and window in milliseconds for KEYS[i]
///
/// Reply: `{rejected, key, used, total}`. On admission `key` is empty and
/// `used`/`total` describe the window with the least headroom left.
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local tight_used, tight_total = 0, 0
local have_tight = false
for i = 1, #KEYS do
  local key = KEYS[i]
  local max = tonumber(ARGV[(i - 1) * 2 + 1])
  local window = tonumber(ARGV[(i - 1) * 2 + 2])
  local record = redis.call('HMGET', key, 'ct', 'lt')
  local used, total
  if record[1] and record[2] then
    used = tonumber(record[1])
    total = tonumber(record[2])
    if used >= total then
      return {1, key, used, total}
    end
    used = redis.call('HINCRBY', key, 'ct', 1)
  else
    used = 1
    total = max
    redis.call('HSET', key, 'ct', used, 'lt', total)
    redis.call('PEXPIRE', key, window)
  end
  if (not have_tight) or (total - used < tight_total - tight_used) then
    tight_used, tight_total = used, total
    have_tight = true
  end
end
return {0, "", tight_used, tight_total}
"#;

/// Outcome of one evaluation; `reached` is a successful answer, not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    pub reached: bool,
    /// Strategy that rejected the call, empty when admitted
    pub triggering_strategy_id: String,
    pub used: u64,
    pub total: u64,
}

impl EvaluationOutcome {
    pub fn admitted(used: u64, total: u64) -> Self {
        Self {
            reached: false,
            triggering_strategy_id: String::new(),
            used,
            total,
        }
    }

    pub fn rejected(strategy_id: impl Into<String>, used: u64, total: u64) -> Self {
        Self {
            reached: true,
            triggering_strategy_id: strategy_id.into(),
            used,
            total,
        }
    }
}

/// Decoded script reply
#[derive(Debug, Clone, PartialEq, Eq)]
struct EvaluationReply {
    rejected: bool,
    key: String,
    used: u64,
    total: u64,
}

fn reply_int(value: &ReplyValue, position: &str) -> ThrottlerResult<i64> {
    match value {
        ReplyValue::Int(n) => Ok(*n),
        ReplyValue::Text(s) => s.parse().map_err(|_| {
            ThrottlerError::Protocol(format!("{} is not an integer: {:?}", position, s))
        }),
        other => Err(ThrottlerError::Protocol(format!(
            "{} is not an integer: {:?}",
            position, other
        ))),
    }
}

fn reply_count(value: &ReplyValue, position: &str) -> ThrottlerResult<u64> {
    let n = reply_int(value, position)?;
    u64::try_from(n)
        .map_err(|_| ThrottlerError::Protocol(format!("{} is negative: {}", position, n)))
}

fn decode_reply(reply: ReplyValue) -> ThrottlerResult<EvaluationReply> {
    let items = match reply {
        ReplyValue::Array(items) if items.len() == 4 => items,
        ReplyValue::Array(items) => {
            return Err(ThrottlerError::Protocol(format!(
                "Expected 4 reply elements, got {}",
                items.len()
            )))
        }
        other => {
            return Err(ThrottlerError::Protocol(format!(
                "Expected an array reply, got {:?}",
                other
            )))
        }
    };

    let rejected = match reply_int(&items[0], "rejected flag")? {
        0 => false,
        1 => true,
        n => {
            return Err(ThrottlerError::Protocol(format!(
                "Rejected flag must be 0 or 1, got {}",
                n
            )))
        }
    };
    let key = match &items[1] {
        ReplyValue::Text(s) => s.clone(),
        ReplyValue::Nil => String::new(),
        other => {
            return Err(ThrottlerError::Protocol(format!(
                "Triggering key is not text: {:?}",
                other
            )))
        }
    };

    Ok(EvaluationReply {
        rejected,
        key,
        used: reply_count(&items[2], "used count")?,
        total: reply_count(&items[3], "total limit")?,
    })
}

/// Runs the fixed-window script for an identity over a list of strategies
pub struct AtomicEvaluator {
    procedure: ProcedureCache,
}

impl AtomicEvaluator {
    /// Register the script with the store
    pub async fn new(store: Arc<dyn CounterStore>) -> ThrottlerResult<Self> {
        let procedure = ProcedureCache::new(store, FIXED_WINDOW_SCRIPT).await?;
        Ok(Self { procedure })
    }

    pub async fn evaluate(
        &self,
        identity: &str,
        strategies: &[Strategy],
    ) -> ThrottlerResult<EvaluationOutcome> {
        if strategies.is_empty() {
            debug!(
                target: "fixed_window_limiter::evaluator",
                identity = %identity,
                "No strategies configured, admitting"
            );
            return Ok(EvaluationOutcome::admitted(0, 0));
        }

        let keys: Vec<String> = strategies
            .iter()
            .map(|s| counter_key(identity, &s.id))
            .collect();
        let args: Vec<String> = strategies
            .iter()
            .flat_map(|s| [s.max_count.to_string(), s.window_millis().to_string()])
            .collect();

        let reply = decode_reply(self.procedure.invoke(&keys, &args).await?)?;

        if !reply.rejected {
            return Ok(EvaluationOutcome::admitted(reply.used, reply.total));
        }

        let strategy = keys
            .iter()
            .position(|k| *k == reply.key)
            .map(|i| &strategies[i])
            .ok_or_else(|| {
                ThrottlerError::Protocol(format!(
                    "Rejected key '{}' was not part of the evaluation",
                    reply.key
                ))
            })?;

        Ok(EvaluationOutcome::rejected(
            strategy.id.clone(),
            reply.used,
            reply.total,
        ))
    }
}
