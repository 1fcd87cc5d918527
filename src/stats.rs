//! Lock-free counters for live queue gauges and totals
//!
//! Readers may observe any single field atomically; snapshots across
//! fields are not guaranteed to be coherent and do not need to be.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;

/// A sequentially consistent signed 64-bit counter.
#[derive(Debug, Default)]
pub struct AtomicInt(AtomicI64);

impl AtomicInt {
    pub fn new(n: i64) -> Self {
        Self(AtomicI64::new(n))
    }

    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, n: i64) {
        self.0.store(n, Ordering::SeqCst);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live counters for one queue.
///
/// The three `in_*` gauges track the sizes of the wait line, the
/// schedule line, and the set of in-flight POSTs; the `total_*` fields
/// only ever grow. `store_errors` counts storage failures the engine
/// absorbed while running degraded instead of crashing.
#[derive(Debug, Default)]
pub struct Stats {
    pub in_queue: AtomicInt,
    pub in_scheduled: AtomicInt,
    pub in_processing: AtomicInt,
    pub total_received: AtomicInt,
    pub total_processed_ok: AtomicInt,
    pub total_processed_error: AtomicInt,
    pub total_processed_rescheduled: AtomicInt,
    /// Cumulative processing time across finished attempts, milliseconds.
    pub total_time: AtomicInt,
    /// Unix second of the most recent successful delivery.
    pub time_last_ok: AtomicInt,
    pub store_errors: AtomicInt,
}

impl Stats {
    /// Copy the current counter values into a serializable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            in_queue: self.in_queue.get(),
            in_scheduled: self.in_scheduled.get(),
            in_processing: self.in_processing.get(),
            total_received: self.total_received.get(),
            total_processed_ok: self.total_processed_ok.get(),
            total_processed_error: self.total_processed_error.get(),
            total_processed_rescheduled: self.total_processed_rescheduled.get(),
            total_time: self.total_time.get(),
            time_last_ok: self.time_last_ok.get(),
            store_errors: self.store_errors.get(),
        }
    }
}

/// Point-in-time view of [`Stats`], as returned by the admin API.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub in_queue: i64,
    pub in_scheduled: i64,
    pub in_processing: i64,
    pub total_received: i64,
    pub total_processed_ok: i64,
    pub total_processed_error: i64,
    pub total_processed_rescheduled: i64,
    pub total_time: i64,
    pub time_last_ok: i64,
    pub store_errors: i64,
}
