//! Status, health and event query endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::models::ProgramEvent;
use crate::monitor::{EventFilter, HealthStatus, MetricsSnapshot, MonitorStatus, TrendPoint};

use super::AppState;

/// Liveness probe, independent of pipeline state.
///
/// GET /health
pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Full status surface snapshot.
///
/// GET /api/v1/status
pub async fn monitor_status(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.monitor.status())
}

/// Latest completed health battery.
///
/// GET /api/v1/health
pub async fn health_snapshot(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, AppError> {
    state
        .monitor
        .health()
        .latest()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No health check has completed yet".to_string()))
}

/// Manual health-check trigger.
///
/// POST /api/v1/health/run
pub async fn run_health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.monitor.run_health_check().await)
}

/// Clear all consecutive-failure counters.
///
/// POST /api/v1/health/reset
pub async fn reset_health_counters(State(state): State<AppState>) -> StatusCode {
    state.monitor.health().reset_counters();
    StatusCode::NO_CONTENT
}

/// GET /api/v1/metrics
pub async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.monitor.aggregator().snapshot())
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<ProgramEvent>,
    pub total: usize,
}

/// Filtered buffered-event query.
///
/// GET /api/v1/events
pub async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Json<EventsResponse> {
    let events = state.monitor.aggregator().query(&filter);
    let total = events.len();
    Json(EventsResponse { events, total })
}

/// Widest accepted trend bucket, one week.
const MAX_BUCKET_MS: u64 = 604_800_000;

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    #[serde(default = "default_bucket_ms")]
    pub bucket_ms: u64,
    #[serde(default = "default_buckets")]
    pub buckets: usize,
}

fn default_bucket_ms() -> u64 {
    3_600_000
}

fn default_buckets() -> usize {
    24
}

/// Time-bucketed event counts.
///
/// GET /api/v1/events/trends
pub async fn event_trends(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<Vec<TrendPoint>>, AppError> {
    if query.buckets == 0 || query.buckets > 1_000 {
        return Err(AppError::Validation(
            "buckets must be between 1 and 1000".to_string(),
        ));
    }
    if query.bucket_ms == 0 || query.bucket_ms > MAX_BUCKET_MS {
        return Err(AppError::Validation(format!(
            "bucket_ms must be between 1 and {}",
            MAX_BUCKET_MS
        )));
    }
    Ok(Json(
        state
            .monitor
            .aggregator()
            .trends(query.bucket_ms, query.buckets),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top_by")]
    pub by: String,
    #[serde(default = "default_top_limit")]
    pub limit: usize,
}

fn default_top_by() -> String {
    "address".to_string()
}

fn default_top_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct RankingEntry {
    pub key: String,
    pub count: u64,
}

/// Top-N addresses or pools by event count.
///
/// GET /api/v1/events/top
pub async fn top_rankings(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<RankingEntry>>, AppError> {
    let ranked = match query.by.as_str() {
        "address" => state.monitor.aggregator().top_addresses(query.limit),
        "pool" => state.monitor.aggregator().top_pools(query.limit),
        other => {
            return Err(AppError::Validation(format!(
                "Unknown ranking key '{}', expected 'address' or 'pool'",
                other
            )))
        }
    };
    Ok(Json(
        ranked
            .into_iter()
            .map(|(key, count)| RankingEntry { key, count })
            .collect(),
    ))
}
