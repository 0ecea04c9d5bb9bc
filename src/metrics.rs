//! Prometheus metrics for pool-sentinel
//!
//! Exposes metrics endpoint for monitoring:
//! - Event totals and buffer depth
//! - Error rate gauge
//! - Last processed ledger height
//! - Overall health gauge
//! - Uptime

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};

use crate::handlers::AppState;
use crate::monitor::{MonitorStatus, OverallHealth};

/// Metrics state
pub struct MetricsState {
    /// Prometheus registry
    registry: Registry,
    /// Total events recorded since startup
    pub events_total: IntGauge,
    /// Events currently held in the rolling buffer
    pub buffered_events: IntGauge,
    /// Error rate over the rolling buffer (0.0 - 1.0)
    pub error_rate: Gauge,
    /// Last processed ledger height
    pub last_height: IntGauge,
    /// Overall health (2 = healthy, 1 = degraded, 0 = unhealthy)
    pub health_status: IntGauge,
    /// Pipeline running flag (1 = running)
    pub running: IntGauge,
    /// Seconds since the aggregator started
    pub uptime_seconds: IntGauge,
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_total = IntGauge::with_opts(Opts::new(
            "sentinel_events_total",
            "Total events recorded since startup",
        ))
        .expect("Failed to create events_total gauge");
        registry
            .register(Box::new(events_total.clone()))
            .expect("Failed to register events_total");

        let buffered_events = IntGauge::with_opts(Opts::new(
            "sentinel_buffered_events",
            "Events currently held in the rolling buffer",
        ))
        .expect("Failed to create buffered_events gauge");
        registry
            .register(Box::new(buffered_events.clone()))
            .expect("Failed to register buffered_events");

        let error_rate = Gauge::with_opts(Opts::new(
            "sentinel_error_rate",
            "Error-bearing events over total recorded",
        ))
        .expect("Failed to create error_rate gauge");
        registry
            .register(Box::new(error_rate.clone()))
            .expect("Failed to register error_rate");

        let last_height = IntGauge::with_opts(Opts::new(
            "sentinel_last_height",
            "Last processed ledger height",
        ))
        .expect("Failed to create last_height gauge");
        registry
            .register(Box::new(last_height.clone()))
            .expect("Failed to register last_height");

        let health_status = IntGauge::with_opts(Opts::new(
            "sentinel_health_status",
            "Overall health (2 = healthy, 1 = degraded, 0 = unhealthy)",
        ))
        .expect("Failed to create health_status gauge");
        registry
            .register(Box::new(health_status.clone()))
            .expect("Failed to register health_status");

        let running = IntGauge::with_opts(Opts::new(
            "sentinel_running",
            "Pipeline running flag (1 = running)",
        ))
        .expect("Failed to create running gauge");
        registry
            .register(Box::new(running.clone()))
            .expect("Failed to register running");

        let uptime_seconds = IntGauge::with_opts(Opts::new(
            "sentinel_uptime_seconds",
            "Seconds since the monitor started",
        ))
        .expect("Failed to create uptime_seconds gauge");
        registry
            .register(Box::new(uptime_seconds.clone()))
            .expect("Failed to register uptime_seconds");

        Self {
            registry,
            events_total,
            buffered_events,
            error_rate,
            last_height,
            health_status,
            running,
            uptime_seconds,
        }
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Refresh gauges from a status snapshot. Called at scrape time.
    pub fn refresh(&self, status: &MonitorStatus) {
        self.events_total.set(status.metrics.total_events as i64);
        self.buffered_events.set(status.buffered_events as i64);
        self.error_rate.set(status.metrics.error_rate);
        self.last_height
            .set(status.last_height.unwrap_or(0) as i64);
        self.health_status
            .set(match status.health.as_ref().map(|h| h.overall) {
                Some(OverallHealth::Healthy) | None => 2,
                Some(OverallHealth::Degraded) => 1,
                Some(OverallHealth::Unhealthy) => 0,
            });
        self.running.set(i64::from(status.running));
        self.uptime_seconds
            .set(status.metrics.uptime_seconds as i64);
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics handler - returns Prometheus metrics in text format
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.refresh(&state.monitor.status());

    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        buffer,
    )
}
