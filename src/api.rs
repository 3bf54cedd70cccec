use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    counter::RateCounter,
    error::{CounterError, CounterResult},
    period::{Limits, Period},
};

const MAX_IDENTIFIER_LEN: usize = 512;

#[derive(Clone)]
pub struct AppState {
    counter: RateCounter,
}

pub fn routes(counter: RateCounter) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/counters/increment", post(increment))
        .route("/v1/counters/{identifier}/{period}", get(usage))
        .with_state(AppState { counter })
}

#[derive(Debug, Deserialize)]
pub struct IncrementRequest {
    pub identifier: String,
    pub limits: Limits,
    #[serde(default = "default_value")]
    pub value: i64,
    pub at_ms: Option<i64>,
}

fn default_value() -> i64 {
    1
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    pub at_ms: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageResponse {
    pub identifier: String,
    pub period: Period,
    pub usage: i64,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "policy": state.counter.policy_name() }))
}

async fn increment(
    State(state): State<AppState>,
    Json(request): Json<IncrementRequest>,
) -> CounterResult<StatusCode> {
    validate_identifier(&request.identifier)?;
    if request.value < 0 {
        return Err(CounterError::InvalidRequest(
            "value must not be negative".to_string(),
        ));
    }
    let now = resolve_now(request.at_ms)?;

    state
        .counter
        .increment(&request.limits, &request.identifier, now, request.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn usage(
    State(state): State<AppState>,
    Path((identifier, period)): Path<(String, String)>,
    Query(query): Query<UsageQuery>,
) -> CounterResult<Json<UsageResponse>> {
    validate_identifier(&identifier)?;
    let period: Period = period.parse()?;
    let now = resolve_now(query.at_ms)?;

    let usage = state.counter.usage(&identifier, period, now).await?;
    Ok(Json(UsageResponse {
        identifier,
        period,
        usage,
    }))
}

fn validate_identifier(identifier: &str) -> CounterResult<()> {
    if identifier.trim().is_empty() {
        return Err(CounterError::InvalidRequest("identifier is empty".to_string()));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(CounterError::InvalidRequest("identifier too long".to_string()));
    }
    if identifier.contains(':') {
        return Err(CounterError::InvalidRequest(
            "identifier must not contain ':'".to_string(),
        ));
    }
    Ok(())
}

fn resolve_now(at_ms: Option<i64>) -> CounterResult<DateTime<Utc>> {
    match at_ms {
        None => Ok(Utc::now()),
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| CounterError::InvalidRequest(format!("at_ms out of range: {ms}"))),
    }
}
