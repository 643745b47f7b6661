use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::ThrottlerError;
use crate::limiter::Limiter;
use crate::response::{CheckResponse, ConfigResponse, HealthResponse, StrategiesResponse};

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub limiter: Limiter,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetLimitRequest {
    #[validate(range(min = 1, message = "limit must be at least 1"))]
    pub limit: u64,
}

/// Count a request for an identity
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let outcome = state.limiter.check(&identity).await?;
    let reached = outcome.reached;
    let remaining = outcome.total.saturating_sub(outcome.used);
    let total = outcome.total;

    let mut resp = Json(CheckResponse::from(outcome)).into_response();
    resp.headers_mut()
        .insert("X-RateLimit-Limit", HeaderValue::from(total));
    resp.headers_mut()
        .insert("X-RateLimit-Remaining", HeaderValue::from(remaining));

    if reached {
        *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    }

    Ok(resp)
}

/// Read usage of one identity under one strategy
pub async fn get_usage(
    State(state): State<SharedState>,
    Path((identity, strategy)): Path<(String, String)>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let usage = state.limiter.inspect(&identity, &strategy).await?;
    Ok(Json(usage))
}

/// Change the max count of a strategy
pub async fn set_limit(
    State(state): State<SharedState>,
    Path((identity, strategy)): Path<(String, String)>,
    Json(payload): Json<SetLimitRequest>,
) -> Result<impl IntoResponse, ThrottlerError> {
    payload
        .validate()
        .map_err(|e| ThrottlerError::Validation(e.to_string()))?;

    state
        .limiter
        .set_limit(&identity, &strategy, payload.limit)
        .await?;

    Ok(Json(ConfigResponse::success(
        "Limit updated",
        identity,
        strategy,
    )))
}

/// Remove a strategy and the identity's record for it
pub async fn remove_limit(
    State(state): State<SharedState>,
    Path((identity, strategy)): Path<(String, String)>,
) -> Result<impl IntoResponse, ThrottlerError> {
    state.limiter.remove_limit(&identity, &strategy).await?;

    Ok(Json(ConfigResponse::success(
        "Limit removed",
        identity,
        strategy,
    )))
}

/// List configured strategies in evaluation order
pub async fn list_strategies(State(state): State<SharedState>) -> impl IntoResponse {
    Json(StrategiesResponse {
        strategies: state.limiter.strategies().await,
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.limiter.store();
    let store_connected = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "fixed_window_limiter::handlers", error = %e, "Store ping failed");
            false
        }
    };
    let strategies = state.limiter.strategies().await.len();

    let status = if store_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse::new(store.name(), store_connected, strategies)),
    )
}
