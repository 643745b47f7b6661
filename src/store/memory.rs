//! In-process counter store.
//!
//! Serves as the local-only backend when no Redis URL is configured and as
//! the test double for the limiter. Registered procedures are tracked by
//! handle only; invoking any live handle runs the fixed-window evaluation
//! natively while holding the store lock, which gives the same atomicity the
//! Redis script has.

use super::{CounterStore, ReplyValue};
use crate::error::{ThrottlerError, ThrottlerResult, NOSCRIPT_PREFIX};
use crate::key_generator::{COUNT_FIELD, LIMIT_FIELD};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Record {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    procedures: HashSet<String>,
}

impl State {
    /// Live record for `key`, dropping it first if its TTL has elapsed
    fn live_record(&mut self, key: &str, now: Instant) -> Option<&mut Record> {
        if self
            .records
            .get(key)
            .is_some_and(|record| record.expires_at <= now)
        {
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every registered procedure, as a restarted or evicting server would
    pub async fn flush_procedures(&self) {
        self.state.lock().await.procedures.clear();
    }

    /// Number of live counter records
    pub async fn record_count(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .records
            .values()
            .filter(|record| record.expires_at > now)
            .count()
    }
}

fn parse_field(record: &Record, field: &str) -> Option<i64> {
    record.fields.get(field).and_then(|v| v.parse().ok())
}

fn parse_arg(args: &[String], index: usize) -> ThrottlerResult<i64> {
    args.get(index)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ThrottlerError::Store(format!("Procedure argument {} is missing or not numeric", index + 1)))
}

/// Native twin of the fixed-window script in `evaluator.rs`
fn evaluate_fixed_window(
    state: &mut State,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> ThrottlerResult<ReplyValue> {
    // (used, total) of the window with the least headroom so far
    let mut tightest: Option<(i64, i64)> = None;

    for (i, key) in keys.iter().enumerate() {
        let max = parse_arg(args, i * 2)?;
        let window_ms = parse_arg(args, i * 2 + 1)?;

        let existing = state.live_record(key, now).and_then(|record| {
            let count = parse_field(record, COUNT_FIELD)?;
            let limit = parse_field(record, LIMIT_FIELD)?;
            Some((record, count, limit))
        });

        let (used, total) = match existing {
            Some((_, count, limit)) if count >= limit => {
                return Ok(ReplyValue::Array(vec![
                    ReplyValue::Int(1),
                    ReplyValue::Text(key.clone()),
                    ReplyValue::Int(count),
                    ReplyValue::Int(limit),
                ]));
            }
            Some((record, count, limit)) => {
                record
                    .fields
                    .insert(COUNT_FIELD.to_string(), (count + 1).to_string());
                (count + 1, limit)
            }
            None => {
                let mut fields = HashMap::new();
                fields.insert(COUNT_FIELD.to_string(), "1".to_string());
                fields.insert(LIMIT_FIELD.to_string(), max.to_string());
                let ttl = Duration::from_millis(window_ms.max(0) as u64);
                state.records.insert(
                    key.clone(),
                    Record {
                        fields,
                        expires_at: now + ttl,
                    },
                );
                (1, max)
            }
        };

        let is_tighter = match tightest {
            None => true,
            Some((t_used, t_total)) => total - used < t_total - t_used,
        };
        if is_tighter {
            tightest = Some((used, total));
        }
    }

    let (used, total) = tightest.unwrap_or((0, 0));
    Ok(ReplyValue::Array(vec![
        ReplyValue::Int(0),
        ReplyValue::Text(String::new()),
        ReplyValue::Int(used),
        ReplyValue::Int(total),
    ]))
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn register_procedure(&self, _body: &str) -> ThrottlerResult<String> {
        let handle = Uuid::new_v4().simple().to_string();
        self.state.lock().await.procedures.insert(handle.clone());
        Ok(handle)
    }

    async fn invoke_procedure(
        &self,
        handle: &str,
        keys: &[String],
        args: &[String],
    ) -> ThrottlerResult<ReplyValue> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if !state.procedures.contains(handle) {
            return Err(ThrottlerError::Store(format!(
                "{} No matching script for handle {}",
                NOSCRIPT_PREFIX, handle
            )));
        }
        evaluate_fixed_window(&mut state, keys, args, now)
    }

    async fn read_fields(&self, key: &str, fields: &[&str]) -> ThrottlerResult<Vec<Option<String>>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let values = match state.live_record(key, now) {
            Some(record) => fields
                .iter()
                .map(|field| record.fields.get(*field).cloned())
                .collect(),
            None => vec![None; fields.len()],
        };
        Ok(values)
    }

    async fn write_field(&self, key: &str, field: &str, value: &str) -> ThrottlerResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.live_record(key, now) {
            Some(record) => {
                record.fields.insert(field.to_string(), value.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_key(&self, key: &str) -> ThrottlerResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let existed = state.live_record(key, now).is_some();
        state.records.remove(key);
        Ok(existed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
