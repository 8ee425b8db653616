use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Application-wide runtime counters.
///
/// All counters use `Relaxed` ordering; they are independent observations and
/// no cross-variable synchronisation is required.
///
/// Share via `Arc<Metrics>`.
pub struct Metrics {
    /// Deliveries handed to the consumer since startup.
    pub jobs_received: AtomicU64,

    /// Deliveries decoded, dispatched and acknowledged.
    pub jobs_accepted: AtomicU64,

    /// Deliveries NACKed without requeue (malformed payloads).
    pub jobs_rejected: AtomicU64,

    /// Deliveries NACKed with requeue (no handler, dispatch failure).
    pub jobs_requeued: AtomicU64,

    /// Jobs whose analysis stream completed.
    pub jobs_succeeded: AtomicU64,

    /// Jobs that ended with a synthesized FAIL result.
    pub jobs_failed: AtomicU64,

    /// Result messages delivered to the broker.
    pub results_published: AtomicU64,

    /// Result messages lost after the reconnect retry also failed.
    pub publish_failures: AtomicU64,

    /// Jobs currently running on their own task (gauge).
    pub jobs_in_flight: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_received: AtomicU64::new(0),
            jobs_accepted: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            results_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            jobs_in_flight: AtomicI64::new(0),
        }
    }

    // ── Convenience increment methods ─────────────────────────────────────────

    pub fn inc_received(&self) {
        self.jobs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requeued(&self) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_published(&self) {
        self.results_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_flight(&self) {
        self.jobs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_in_flight(&self) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    // ── Snapshot ──────────────────────────────────────────────────────────────

    /// Point-in-time copy of all counters. Approximate under concurrent updates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.jobs_received.load(Ordering::Relaxed),
            accepted: self.jobs_accepted.load(Ordering::Relaxed),
            rejected: self.jobs_rejected.load(Ordering::Relaxed),
            requeued: self.jobs_requeued.load(Ordering::Relaxed),
            succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            failed: self.jobs_failed.load(Ordering::Relaxed),
            published: self.results_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            in_flight: self.jobs_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Log a summary of all metrics via `tracing`.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            received         = s.received,
            accepted         = s.accepted,
            rejected         = s.rejected,
            requeued         = s.requeued,
            succeeded        = s.succeeded,
            failed           = s.failed,
            published        = s.published,
            publish_failures = s.publish_failures,
            in_flight        = s.in_flight,
            "📊 metrics summary"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of [`Metrics`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub in_flight: i64,
}
