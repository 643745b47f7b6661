use crate::evaluator::EvaluationOutcome;
use crate::strategy::Strategy;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub used: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl From<EvaluationOutcome> for CheckResponse {
    fn from(outcome: EvaluationOutcome) -> Self {
        Self {
            allowed: !outcome.reached,
            used: outcome.used,
            total: outcome.total,
            strategy: outcome.reached.then_some(outcome.triggering_strategy_id),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub status: String,
    pub message: String,
    pub identity: String,
    pub strategy: String,
}

impl ConfigResponse {
    pub fn success(message: &str, identity: String, strategy: String) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            identity,
            strategy,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StrategiesResponse {
    pub strategies: Vec<Strategy>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store: String,
    pub store_connected: bool,
    pub strategies: usize,
}

impl HealthResponse {
    pub fn new(store: &str, store_connected: bool, strategies: usize) -> Self {
        Self {
            status: if store_connected { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            store_connected,
            strategies,
        }
    }
}
