//! HTTP handlers for pool-sentinel

mod admin;
mod status;

pub use admin::*;
pub use status::*;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::metrics::MetricsState;
use crate::monitor::Monitor;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub metrics: Arc<MetricsState>,
}

/// Build the full route table. Layers (trace, CORS) are applied by the
/// caller.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/api/v1/status", get(monitor_status))
        .route("/api/v1/health", get(health_snapshot))
        .route("/api/v1/health/run", post(run_health_check))
        .route("/api/v1/health/reset", post(reset_health_counters))
        .route("/api/v1/metrics", get(metrics_snapshot))
        .route("/api/v1/events", get(list_events))
        .route("/api/v1/events/trends", get(event_trends))
        .route("/api/v1/events/top", get(top_rankings))
        .route("/api/v1/rules", get(list_rules).post(add_rule))
        .route("/api/v1/rules/:id", delete(remove_rule))
        .route("/api/v1/channels", get(list_channels).post(add_channel))
        .route("/api/v1/channels/:name", delete(remove_channel))
        .route("/api/v1/channels/:name/enabled", put(set_channel_enabled))
}
