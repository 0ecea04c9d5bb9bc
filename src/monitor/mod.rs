//! Monitoring pipeline coordinator.
//!
//! Owns the component graph (poller, rule engine, dispatcher, health
//! monitor, metrics aggregator) and drives it with three independent
//! timer loops. Loops never overlap with themselves: each tick awaits
//! the pass it starts, and missed ticks are skipped rather than queued.

pub mod aggregator;
pub mod decoder;
pub mod dispatcher;
pub mod health;
pub mod poller;
pub mod rules;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, MonitorSettings};
use crate::error::{AppError, AppResult};
use crate::ledger::LedgerReader;
use crate::models::{AlertEnvelope, EventKind, ProgramEvent, Severity};

pub use aggregator::{EventFilter, MetricsAggregator, MetricsSnapshot, TrendPoint};
pub use decoder::EventDecoder;
pub use dispatcher::{AlertDispatcher, ChannelSender, HttpChannelSender};
pub use health::{CheckStatus, HealthMonitor, HealthStatus, OverallHealth};
pub use poller::{LedgerPoller, PollOutcome};
pub use rules::RuleEngine;

/// Status surface snapshot.
#[derive(Debug, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub last_height: Option<u64>,
    pub buffered_events: usize,
    pub rules: usize,
    pub channels: usize,
    pub health: Option<HealthStatus>,
    pub metrics: MetricsSnapshot,
}

/// Event path shared by the timer loop and the manual trigger. One
/// poll pass processes events strictly in order; events from one pass
/// are never interleaved with a later pass.
#[derive(Clone)]
struct Pipeline {
    poller: Arc<LedgerPoller>,
    rules: Arc<RuleEngine>,
    aggregator: Arc<MetricsAggregator>,
    dispatcher: Arc<AlertDispatcher>,
}

impl Pipeline {
    async fn run_pass(&self) {
        match self.poller.poll().await {
            Ok(outcome) => {
                for event in &outcome.events {
                    self.process_event(event).await;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Poll pass failed");
                let mut event =
                    ProgramEvent::new(EventKind::NetworkError, "", 0, Severity::High);
                event.error = Some(e.to_string());
                self.process_event(&event).await;
            }
        }
    }

    async fn process_event(&self, event: &ProgramEvent) {
        // Rules see only prior events in the metrics buffer, so rate
        // limits count events before this one.
        let fired = self.rules.evaluate(event);
        self.aggregator.record(event);

        if !fired.is_empty() {
            self.dispatcher.dispatch(event, &fired).await;
        }

        if event.kind.is_error() {
            let envelope = AlertEnvelope::system(
                event.kind.to_string(),
                event.severity,
                event
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} event observed", event.kind)),
            );
            self.dispatcher.dispatch_system(envelope).await;
        }
    }
}

pub struct Monitor {
    pipeline: Pipeline,
    health: Arc<HealthMonitor>,
    settings: MonitorSettings,
    running: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(
        config: &AppConfig,
        reader: Arc<dyn LedgerReader>,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        let aggregator = Arc::new(MetricsAggregator::new(config.monitor.event_buffer_capacity));
        let decoder = EventDecoder::new(config.ledger.program_id.clone(), &config.monitor);
        let poller = Arc::new(LedgerPoller::new(
            Arc::clone(&reader),
            decoder,
            &config.ledger,
            &config.monitor,
        ));
        let rules = Arc::new(RuleEngine::new(
            config.alerting.rules.clone(),
            Arc::clone(&aggregator),
        ));
        let dispatcher = Arc::new(AlertDispatcher::new(
            config.alerting.channels.clone(),
            sender,
        ));
        let health = Arc::new(HealthMonitor::new(reader, &config.ledger, &config.monitor));

        Self {
            pipeline: Pipeline {
                poller,
                rules,
                aggregator,
                dispatcher,
            },
            health,
            settings: config.monitor.clone(),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.pipeline.rules
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.pipeline.dispatcher
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.pipeline.aggregator
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.is_running(),
            last_height: self.pipeline.poller.last_height(),
            buffered_events: self.pipeline.aggregator.buffered_events(),
            rules: self.pipeline.rules.list_rules().len(),
            channels: self.pipeline.dispatcher.list_channels().len(),
            health: self.health.latest(),
            metrics: self.pipeline.aggregator.snapshot(),
        }
    }

    /// Run one poll pass outside the timer, used by tests and the
    /// manual trigger endpoint.
    pub async fn poll_once(&self) {
        self.pipeline.run_pass().await;
    }

    /// Run the health battery once and raise a system alert when the
    /// result is unhealthy.
    pub async fn run_health_check(&self) -> HealthStatus {
        let status = self.health.run().await;
        if status.overall == OverallHealth::Unhealthy {
            let failing: Vec<&str> = status
                .checks
                .iter()
                .filter(|c| c.status == CheckStatus::Fail)
                .map(|c| c.name)
                .collect();
            self.pipeline
                .dispatcher
                .dispatch_system(AlertEnvelope::system(
                    "health_check",
                    Severity::Critical,
                    format!("Monitor unhealthy, failing checks: {}", failing.join(", ")),
                ))
                .await;
        }
        status
    }

    async fn run_metrics_tick(&self) {
        self.pipeline.aggregator.tick();
        let snapshot = self.pipeline.aggregator.snapshot();
        for (rule, message) in self.pipeline.rules.check_thresholds(&snapshot) {
            self.pipeline
                .dispatcher
                .dispatch_system(AlertEnvelope::system(
                    "metric_threshold",
                    rule.severity,
                    format!("Rule '{}': {}", rule.name, message),
                ))
                .await;
        }
    }

    /// Spawn the poll, health and metrics loops. A stopped monitor
    /// cannot be restarted: its cancellation tokens are spent.
    pub fn start(self: &Arc<Self>) -> AppResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::Validation(
                "Monitor has been stopped and cannot be restarted".to_string(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::Validation("Monitor already running".to_string()));
        }

        tracing::info!(
            poll_interval_ms = self.settings.poll_interval().as_millis() as u64,
            health_interval_ms = self.settings.health_interval().as_millis() as u64,
            "Monitor starting"
        );
        if self.settings.websocket_mode {
            tracing::warn!("websocket_mode is set but this build is polling-only");
        }

        let mut tasks = self.tasks.lock();

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.settings.poll_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = monitor.shutdown.cancelled() => break,
                    _ = interval.tick() => monitor.pipeline.run_pass().await,
                }
            }
        }));

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.settings.health_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = monitor.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        monitor.run_health_check().await;
                    }
                }
            }
        }));

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.settings.metrics_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = monitor.shutdown.cancelled() => break,
                    _ = interval.tick() => monitor.run_metrics_tick().await,
                }
            }
        }));

        Ok(())
    }

    /// Cancel all loops and await any in-flight pass. Cooldown-expiry
    /// timers are cancelled with the rule engine.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Monitor stopping");

        self.shutdown.cancel();
        self.pipeline.rules.stop();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Monitor task join failed");
            }
        }
        tracing::info!("Monitor stopped");
    }
}
