//! Per-operation counters for store calls.
//!
//! Records are keyed by `(operation, table)`, created on first use and only
//! removed by [`OperationMetrics::reset`]. All counters are atomics, so timers
//! and readers never block each other once a record exists.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct MetricKey {
    operation: String,
    table: String,
}

impl MetricKey {
    fn new(operation: &str, table: &str) -> Self {
        Self {
            operation: operation.to_string(),
            table: table.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct MetricRecord {
    count: AtomicU64,
    errors: AtomicU64,
    latency_micros: AtomicU64,
    /// `f64` bits.
    capacity: AtomicU64,
    /// Milliseconds since the epoch; zero until the first operation.
    last_operation_millis: AtomicI64,
}

impl MetricRecord {
    fn add_capacity(&self, units: f64) {
        // fetch_update only fails when the closure returns None
        let _ = self
            .capacity
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + units).to_bits())
            });
    }

    fn stats(&self) -> OperationStats {
        let count = self.count.load(Ordering::Acquire);
        let error_count = self.errors.load(Ordering::Acquire);
        let latency_micros = self.latency_micros.load(Ordering::Acquire);
        let total_capacity = f64::from_bits(self.capacity.load(Ordering::Acquire));
        let last_millis = self.last_operation_millis.load(Ordering::Acquire);

        let per_op = |total: f64| {
            if count == 0 {
                0.0
            } else {
                total / count as f64
            }
        };

        OperationStats {
            count,
            error_count,
            error_rate_percent: per_op(error_count as f64 * 100.0),
            avg_latency_ms: per_op(latency_micros as f64 / 1000.0),
            total_capacity,
            avg_capacity_per_op: per_op(total_capacity),
            last_operation_time: if last_millis == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_millis).single()
            },
        }
    }
}

/// Aggregate statistics for one `(operation, table)` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub error_count: u64,
    pub error_rate_percent: f64,
    pub avg_latency_ms: f64,
    pub total_capacity: f64,
    pub avg_capacity_per_op: f64,
    pub last_operation_time: Option<DateTime<Utc>>,
}

/// Stats of one tracked key, as returned by [`OperationMetrics::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSnapshot {
    pub operation: String,
    pub table: String,
    pub stats: OperationStats,
}

/// Collector of per-operation metrics. Construct once and share via `Arc`.
#[derive(Debug, Default)]
pub struct OperationMetrics {
    records: RwLock<HashMap<MetricKey, Arc<MetricRecord>>>,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, operation: &str, table: &str) -> Arc<MetricRecord> {
        let key = MetricKey::new(operation, table);
        if let Some(record) = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return record.clone();
        }

        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    /// Counts an operation and returns a timer that records its outcome.
    pub fn start_operation(&self, operation: &str, table: &str) -> OperationTimer {
        let record = self.record(operation, table);
        record.count.fetch_add(1, Ordering::AcqRel);
        record
            .last_operation_millis
            .store(Utc::now().timestamp_millis(), Ordering::Release);

        OperationTimer {
            record,
            operation: operation.to_string(),
            table: table.to_string(),
            started: Instant::now(),
        }
    }

    /// Adds consumed capacity units to a key.
    pub fn record_capacity_consumption(&self, operation: &str, table: &str, units: f64) {
        if units.is_finite() && units > 0.0 {
            self.record(operation, table).add_capacity(units);
        }
    }

    /// Stats for a key; all zeros when the key was never used.
    pub fn stats(&self, operation: &str, table: &str) -> OperationStats {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&MetricKey::new(operation, table))
            .map(|record| record.stats())
            .unwrap_or_default()
    }

    /// True when any tracked key's error rate exceeds `threshold_percent`.
    pub fn has_high_error_rate(&self, threshold_percent: f64) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|record| record.stats().error_rate_percent > threshold_percent)
    }

    /// Stats for every tracked key, sorted by table then operation.
    pub fn snapshot(&self) -> Vec<OperationSnapshot> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<OperationSnapshot> = records
            .iter()
            .map(|(key, record)| OperationSnapshot {
                operation: key.operation.clone(),
                table: key.table.clone(),
                stats: record.stats(),
            })
            .collect();
        snapshot.sort_by(|a, b| (&a.table, &a.operation).cmp(&(&b.table, &b.operation)));
        snapshot
    }

    /// Clears all records. Timers still in flight update detached records.
    pub fn reset(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Logs one line per tracked key.
    pub fn log_summary(&self) {
        for entry in self.snapshot() {
            tracing::info!(
                operation = %entry.operation,
                table = %entry.table,
                count = entry.stats.count,
                errors = entry.stats.error_count,
                error_rate_percent = entry.stats.error_rate_percent,
                avg_latency_ms = entry.stats.avg_latency_ms,
                total_capacity = entry.stats.total_capacity,
                "Operation metrics"
            );
        }
    }
}

/// Handle for one in-flight operation.
#[must_use = "record the outcome with record_success, record_error or record_cancelled"]
#[derive(Debug)]
pub struct OperationTimer {
    record: Arc<MetricRecord>,
    operation: String,
    table: String,
    started: Instant,
}

impl OperationTimer {
    fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    pub fn record_success(self) {
        let micros = self.elapsed_micros();
        self.record.latency_micros.fetch_add(micros, Ordering::AcqRel);
        tracing::debug!(
            operation = %self.operation,
            table = %self.table,
            latency_us = micros,
            "Operation succeeded"
        );
    }

    pub fn record_error(self, error: &dyn Display) {
        let micros = self.elapsed_micros();
        self.record.latency_micros.fetch_add(micros, Ordering::AcqRel);
        self.record.errors.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            operation = %self.operation,
            table = %self.table,
            latency_us = micros,
            error = %error,
            "Operation failed"
        );
    }

    /// Records latency only. A cancelled call is neither a success nor an error.
    pub fn record_cancelled(self) {
        let micros = self.elapsed_micros();
        self.record.latency_micros.fetch_add(micros, Ordering::AcqRel);
        tracing::debug!(
            operation = %self.operation,
            table = %self.table,
            latency_us = micros,
            "Operation cancelled"
        );
    }
}
