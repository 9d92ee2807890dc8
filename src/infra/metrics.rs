//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting swaps interval counters
//! atomically.
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::GeofenceEventKind;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lock-free metrics collector for the engine
#[derive(Debug, Default)]
pub struct Metrics {
    // Cumulative counters
    ticks: AtomicU64,
    pairs_evaluated: AtomicU64,
    enters: AtomicU64,
    exits: AtomicU64,
    dwells: AtomicU64,
    approaches: AtomicU64,
    actions_dispatched: AtomicU64,
    action_failures: AtomicU64,
    location_updates: AtomicU64,
    provider_failures: AtomicU64,
    // Interval counters, swapped to zero on each report
    interval_pairs: AtomicU64,
    interval_events: AtomicU64,
}

/// Snapshot of cumulative counters plus interval rates
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub ticks: u64,
    pub pairs_evaluated: u64,
    pub enters: u64,
    pub exits: u64,
    pub dwells: u64,
    pub approaches: u64,
    pub actions_dispatched: u64,
    pub action_failures: u64,
    pub location_updates: u64,
    pub provider_failures: u64,
    pub interval_pairs: u64,
    pub interval_events: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks = %self.ticks,
            pairs = %self.pairs_evaluated,
            enters = %self.enters,
            exits = %self.exits,
            dwells = %self.dwells,
            approaches = %self.approaches,
            actions = %self.actions_dispatched,
            action_failures = %self.action_failures,
            location_updates = %self.location_updates,
            provider_failures = %self.provider_failures,
            interval_pairs = %self.interval_pairs,
            interval_events = %self.interval_events,
            "metrics_report"
        );
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pair_evaluated(&self) {
        self.pairs_evaluated.fetch_add(1, Ordering::Relaxed);
        self.interval_pairs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self, kind: GeofenceEventKind) {
        let counter = match kind {
            GeofenceEventKind::Enter => &self.enters,
            GeofenceEventKind::Exit => &self.exits,
            GeofenceEventKind::Dwell => &self.dwells,
            GeofenceEventKind::Approach => &self.approaches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.interval_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_action_dispatched(&self) {
        self.actions_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_action_failure(&self) {
        self.action_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_update(&self) {
        self.location_updates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Produce a summary; interval counters reset to zero
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            ticks: self.ticks.load(Ordering::Relaxed),
            pairs_evaluated: self.pairs_evaluated.load(Ordering::Relaxed),
            enters: self.enters.load(Ordering::Relaxed),
            exits: self.exits.load(Ordering::Relaxed),
            dwells: self.dwells.load(Ordering::Relaxed),
            approaches: self.approaches.load(Ordering::Relaxed),
            actions_dispatched: self.actions_dispatched.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
            location_updates: self.location_updates.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            interval_pairs: self.interval_pairs.swap(0, Ordering::Relaxed),
            interval_events: self.interval_events.swap(0, Ordering::Relaxed),
        }
    }
}
