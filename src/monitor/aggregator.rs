//! Rolling event buffer and derived metrics.
//!
//! Keeps a bounded FIFO of the most recent events and derives counters
//! and rates from it. Derived values are recomputed by rescanning the
//! buffer on each recorded event; the buffer is small enough that the
//! linear scan is an accepted cost.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{EventKind, ProgramEvent, Severity};

/// Point-in-time view of the aggregated metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total events recorded since startup, not capped by the buffer.
    pub total_events: u64,
    pub buffered_events: usize,
    pub events_by_kind: HashMap<String, u64>,
    pub events_by_severity: HashMap<String, u64>,
    pub error_rate: f64,
    pub success_rate: f64,
    pub unique_addresses: usize,
    pub unique_pools: usize,
    pub total_volume: f64,
    pub average_amount: f64,
    pub events_last_hour: usize,
    /// Average lag between ledger timestamp and ingestion, over the
    /// most recent 100 events. Recomputed on the metrics timer.
    pub average_processing_ms: f64,
    pub last_event: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}

/// Query parameters for the buffered-event endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub severity: Option<Severity>,
    pub address: Option<String>,
    pub pool_id: Option<String>,
    pub token_mint: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

/// One bucket of the time-series trend query.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub count: usize,
    pub error_count: usize,
}

struct BufferedEvent {
    event: ProgramEvent,
    recorded_at: DateTime<Utc>,
}

struct AggregatorState {
    buffer: VecDeque<BufferedEvent>,
    total_events: u64,
    events_by_kind: HashMap<EventKind, u64>,
    events_by_severity: HashMap<Severity, u64>,
    error_rate: f64,
    unique_addresses: usize,
    unique_pools: usize,
    total_volume: f64,
    average_amount: f64,
    events_last_hour: usize,
    average_processing_ms: f64,
    last_event: Option<DateTime<Utc>>,
    uptime_seconds: u64,
}

pub struct MetricsAggregator {
    capacity: usize,
    started_at: Instant,
    state: RwLock<AggregatorState>,
}

impl MetricsAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            started_at: Instant::now(),
            state: RwLock::new(AggregatorState {
                buffer: VecDeque::new(),
                total_events: 0,
                events_by_kind: HashMap::new(),
                events_by_severity: HashMap::new(),
                error_rate: 0.0,
                unique_addresses: 0,
                unique_pools: 0,
                total_volume: 0.0,
                average_amount: 0.0,
                events_last_hour: 0,
                average_processing_ms: 0.0,
                last_event: None,
                uptime_seconds: 0,
            }),
        }
    }

    /// Record one event and refresh the derived values.
    pub fn record(&self, event: &ProgramEvent) {
        let mut state = self.state.write();

        state.buffer.push_back(BufferedEvent {
            event: event.clone(),
            recorded_at: Utc::now(),
        });
        if state.buffer.len() > self.capacity {
            state.buffer.pop_front();
        }

        state.total_events += 1;
        *state.events_by_kind.entry(event.kind).or_insert(0) += 1;
        *state.events_by_severity.entry(event.severity).or_insert(0) += 1;
        state.last_event = Some(event.timestamp);

        Self::recompute_derived(&mut state);
    }

    fn recompute_derived(state: &mut AggregatorState) {
        let errors = state
            .buffer
            .iter()
            .filter(|b| b.event.kind.is_error())
            .count();
        state.error_rate = if state.total_events == 0 {
            0.0
        } else {
            errors as f64 / state.total_events as f64
        };

        let mut addresses = HashSet::new();
        let mut pools = HashSet::new();
        let mut volume = 0.0;
        let mut amounts = 0usize;
        let hour_ago = Utc::now() - ChronoDuration::hours(1);
        let mut recent = 0usize;

        for buffered in &state.buffer {
            if let Some(address) = &buffered.event.address {
                addresses.insert(address.clone());
            }
            if let Some(pool) = &buffered.event.pool_id {
                pools.insert(pool.clone());
            }
            if let Some(amount) = buffered.event.amount {
                volume += amount;
                amounts += 1;
            }
            if buffered.event.timestamp >= hour_ago {
                recent += 1;
            }
        }

        state.unique_addresses = addresses.len();
        state.unique_pools = pools.len();
        state.total_volume = volume;
        state.average_amount = if amounts == 0 { 0.0 } else { volume / amounts as f64 };
        state.events_last_hour = recent;
    }

    /// Timer-driven recomputation of uptime and ingest lag.
    pub fn tick(&self) {
        let mut state = self.state.write();
        state.uptime_seconds = self.started_at.elapsed().as_secs();

        let recent: Vec<i64> = state
            .buffer
            .iter()
            .rev()
            .take(100)
            .map(|b| (b.recorded_at - b.event.timestamp).num_milliseconds().max(0))
            .collect();
        state.average_processing_ms = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<i64>() as f64 / recent.len() as f64
        };
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read();
        MetricsSnapshot {
            total_events: state.total_events,
            buffered_events: state.buffer.len(),
            events_by_kind: state
                .events_by_kind
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            events_by_severity: state
                .events_by_severity
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            error_rate: state.error_rate,
            success_rate: 1.0 - state.error_rate,
            unique_addresses: state.unique_addresses,
            unique_pools: state.unique_pools,
            total_volume: state.total_volume,
            average_amount: state.average_amount,
            events_last_hour: state.events_last_hour,
            average_processing_ms: state.average_processing_ms,
            last_event: state.last_event,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn buffered_events(&self) -> usize {
        self.state.read().buffer.len()
    }

    /// Count buffered events of `kind` recorded inside the trailing
    /// window that also satisfy `matches`. Used for rule rate
    /// limiting. The window is measured against ingestion time, not
    /// ledger block time, so replayed historical transactions still
    /// count against the budget.
    pub fn count_in_window<F>(&self, kind: EventKind, window_ms: u64, matches: F) -> usize
    where
        F: Fn(&ProgramEvent) -> bool,
    {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(window_ms as i64);
        self.state
            .read()
            .buffer
            .iter()
            .filter(|b| b.event.kind == kind && b.recorded_at >= cutoff && matches(&b.event))
            .count()
    }

    /// Filtered buffered-event query, newest first, with offset/limit
    /// paging.
    pub fn query(&self, filter: &EventFilter) -> Vec<ProgramEvent> {
        let state = self.state.read();
        let limit = filter.limit.unwrap_or(100);

        state
            .buffer
            .iter()
            .rev()
            .filter(|b| {
                let e = &b.event;
                filter.kind.map_or(true, |k| e.kind == k)
                    && filter.severity.map_or(true, |s| e.severity == s)
                    && filter
                        .address
                        .as_ref()
                        .map_or(true, |a| e.address.as_deref() == Some(a.as_str()))
                    && filter
                        .pool_id
                        .as_ref()
                        .map_or(true, |p| e.pool_id.as_deref() == Some(p.as_str()))
                    && filter
                        .token_mint
                        .as_ref()
                        .map_or(true, |t| e.token_mint.as_deref() == Some(t.as_str()))
                    && filter.from.map_or(true, |f| e.timestamp >= f)
                    && filter.to.map_or(true, |t| e.timestamp <= t)
            })
            .skip(filter.offset)
            .take(limit)
            .map(|b| b.event.clone())
            .collect()
    }

    pub fn top_addresses(&self, n: usize) -> Vec<(String, u64)> {
        self.top_by(n, |e| e.address.clone())
    }

    pub fn top_pools(&self, n: usize) -> Vec<(String, u64)> {
        self.top_by(n, |e| e.pool_id.clone())
    }

    fn top_by<F>(&self, n: usize, key: F) -> Vec<(String, u64)>
    where
        F: Fn(&ProgramEvent) -> Option<String>,
    {
        let state = self.state.read();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for buffered in &state.buffer {
            if let Some(k) = key(&buffered.event) {
                *counts.entry(k).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Time-bucketed counts over the trailing `buckets * bucket_ms`
    /// range, oldest bucket first. Buckets whose bounds fall outside
    /// the representable time range are skipped.
    pub fn trends(&self, bucket_ms: u64, buckets: usize) -> Vec<TrendPoint> {
        let state = self.state.read();
        let now = Utc::now();
        let width_ms = i64::try_from(bucket_ms).unwrap_or(i64::MAX).max(1);

        (0..buckets)
            .rev()
            .filter_map(|i| {
                let start_offset = width_ms.checked_mul(i as i64 + 1)?;
                let end_offset = width_ms.checked_mul(i as i64)?;
                let start =
                    now.checked_sub_signed(ChronoDuration::try_milliseconds(start_offset)?)?;
                let end = now.checked_sub_signed(ChronoDuration::try_milliseconds(end_offset)?)?;
                let mut count = 0;
                let mut error_count = 0;
                for buffered in &state.buffer {
                    let ts = buffered.event.timestamp;
                    if ts >= start && ts < end {
                        count += 1;
                        if buffered.event.kind.is_error() {
                            error_count += 1;
                        }
                    }
                }
                Some(TrendPoint {
                    bucket_start: start,
                    count,
                    error_count,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> ProgramEvent {
        ProgramEvent::new(kind, "sig", 1, Severity::Low)
    }

    #[test]
    fn test_error_rate_half() {
        let aggregator = MetricsAggregator::new(100);
        aggregator.record(&event(EventKind::TaskCompletionRecorded));
        aggregator.record(&event(EventKind::ContractError));
        aggregator.record(&event(EventKind::TaskCompletionRecorded));
        aggregator.record(&event(EventKind::TransactionFailed));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.error_rate, 0.5);
        assert_eq!(snapshot.success_rate, 0.5);
        assert_eq!(snapshot.total_events, 4);
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let aggregator = MetricsAggregator::new(2);
        for _ in 0..5 {
            aggregator.record(&event(EventKind::TaskCompletionRecorded));
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.buffered_events, 2);
        assert_eq!(snapshot.total_events, 5);
    }

    #[test]
    fn test_derived_values() {
        let aggregator = MetricsAggregator::new(100);

        let mut first = event(EventKind::RewardsWithdrawn);
        first.address = Some("alice".to_string());
        first.pool_id = Some("pool-1".to_string());
        first.amount = Some(100.0);
        aggregator.record(&first);

        let mut second = event(EventKind::RewardsWithdrawn);
        second.address = Some("bob".to_string());
        second.pool_id = Some("pool-1".to_string());
        second.amount = Some(300.0);
        aggregator.record(&second);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.unique_addresses, 2);
        assert_eq!(snapshot.unique_pools, 1);
        assert_eq!(snapshot.total_volume, 400.0);
        assert_eq!(snapshot.average_amount, 200.0);
        assert_eq!(snapshot.events_last_hour, 2);
    }

    #[test]
    fn test_query_filters_and_pages() {
        let aggregator = MetricsAggregator::new(100);
        for i in 0..5 {
            let mut e = event(EventKind::TaskCompletionRecorded);
            e.address = Some(format!("addr-{}", i % 2));
            aggregator.record(&e);
        }
        aggregator.record(&event(EventKind::ContractError));

        let filter = EventFilter {
            kind: Some(EventKind::TaskCompletionRecorded),
            ..Default::default()
        };
        assert_eq!(aggregator.query(&filter).len(), 5);

        let filter = EventFilter {
            address: Some("addr-0".to_string()),
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(aggregator.query(&filter).len(), 2);

        let filter = EventFilter {
            kind: Some(EventKind::TaskCompletionRecorded),
            offset: 4,
            ..Default::default()
        };
        assert_eq!(aggregator.query(&filter).len(), 1);
    }

    #[test]
    fn test_top_rankings() {
        let aggregator = MetricsAggregator::new(100);
        for address in ["a", "b", "b", "c", "c", "c"] {
            let mut e = event(EventKind::TaskCompletionRecorded);
            e.address = Some(address.to_string());
            aggregator.record(&e);
        }

        let top = aggregator.top_addresses(2);
        assert_eq!(top[0], ("c".to_string(), 3));
        assert_eq!(top[1], ("b".to_string(), 2));
    }

    #[test]
    fn test_count_in_window_applies_predicate() {
        let aggregator = MetricsAggregator::new(100);
        for amount in [50.0, 150.0, 250.0] {
            let mut e = event(EventKind::RewardsWithdrawn);
            e.amount = Some(amount);
            aggregator.record(&e);
        }

        let count = aggregator.count_in_window(EventKind::RewardsWithdrawn, 60_000, |e| {
            e.amount.unwrap_or(0.0) > 100.0
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn test_trends_buckets_recent_events() {
        let aggregator = MetricsAggregator::new(100);
        let mut e = event(EventKind::TaskCompletionRecorded);
        e.timestamp = Utc::now() - ChronoDuration::milliseconds(500);
        aggregator.record(&e);
        let mut err = event(EventKind::ContractError);
        err.timestamp = Utc::now() - ChronoDuration::milliseconds(1_500);
        aggregator.record(&err);

        let points = aggregator.trends(1_000, 3);
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].count, 1);
        assert_eq!(points[2].error_count, 0);
        assert_eq!(points[1].count, 1);
        assert_eq!(points[1].error_count, 1);
    }

    #[test]
    fn test_trends_skips_unrepresentable_buckets() {
        let aggregator = MetricsAggregator::new(100);
        aggregator.record(&event(EventKind::TaskCompletionRecorded));

        // Widths beyond the datetime range must not panic; buckets
        // whose bounds cannot be represented are dropped.
        let points = aggregator.trends(u64::MAX, 1_000);
        assert!(points.is_empty());

        let points = aggregator.trends(1_000_000_000_000_000, 1_000);
        assert!(points.len() < 1_000);
    }

    #[test]
    fn test_tick_updates_processing_average() {
        let aggregator = MetricsAggregator::new(100);
        let mut e = event(EventKind::TaskCompletionRecorded);
        e.timestamp = Utc::now() - ChronoDuration::milliseconds(500);
        aggregator.record(&e);

        aggregator.tick();
        let snapshot = aggregator.snapshot();
        assert!(snapshot.average_processing_ms >= 500.0);
    }
}
