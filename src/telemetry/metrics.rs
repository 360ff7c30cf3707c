//! Metrics collection for offload statistics.
//!
//! Provides thread-safe counters for tracking admission, hook, and flow
//! lifecycle events.

use crate::offload::TableKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic gauge holding the latest observed value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Metrics registry for the offload path.
#[derive(Debug, Default)]
pub struct OffloadMetrics {
    // Admission metrics
    /// Number of connections offloaded to the fast path.
    pub flows_offloaded: Counter,
    /// Number of packets that failed an admission check.
    pub admission_skipped: Counter,
    /// Number of admissions rolled back on route resolution failure.
    pub route_failures: Counter,
    /// Number of admissions rolled back on flow table insertion failure.
    pub insert_failures: Counter,

    // Hook metrics
    /// Number of device hooks installed.
    pub hooks_installed: Counter,
    /// Number of device hooks removed.
    pub hooks_removed: Counter,

    // Flow lifecycle metrics
    /// Number of flows purged by device removal.
    pub flows_purged: Counter,

    // Hook count gauges, one per table
    /// Current number of software table hook entries.
    pub software_hooks: Gauge,
    /// Current number of hardware table hook entries.
    pub hardware_hooks: Gauge,
}

impl OffloadMetrics {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook count gauge for the given table.
    pub fn active_hooks(&self, kind: TableKind) -> &Gauge {
        match kind {
            TableKind::Software => &self.software_hooks,
            TableKind::Hardware => &self.hardware_hooks,
        }
    }

    /// Exports all metrics as key-value pairs.
    ///
    /// This format is designed to be easily convertible to Prometheus format
    /// in the future.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("flows_offloaded".into(), self.flows_offloaded.get()),
            ("admission_skipped".into(), self.admission_skipped.get()),
            ("route_failures".into(), self.route_failures.get()),
            ("insert_failures".into(), self.insert_failures.get()),
            ("hooks_installed".into(), self.hooks_installed.get()),
            ("hooks_removed".into(), self.hooks_removed.get()),
            ("flows_purged".into(), self.flows_purged.get()),
            ("software_hooks".into(), self.software_hooks.get()),
            ("hardware_hooks".into(), self.hardware_hooks.get()),
        ]
    }
}
