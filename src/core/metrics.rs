// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the coordination client.
//!
//! This module uses `lazy_static` so metrics are registered once for the whole
//! process, however many `ConnectionManager`s exist.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Sessions ---
    /// Sessions that reached the connected state.
    pub static ref SESSIONS_ESTABLISHED_TOTAL: Counter =
        register_counter!("zksession_sessions_established_total", "Total number of sessions established.").unwrap();
    /// Dial attempts that did not yield a session.
    pub static ref DIAL_FAILURES_TOTAL: Counter =
        register_counter!("zksession_dial_failures_total", "Total number of failed session dials.").unwrap();
    /// Cached sessions dropped, labeled by what triggered it.
    pub static ref SESSION_INVALIDATIONS_TOTAL: CounterVec =
        register_counter_vec!("zksession_session_invalidations_total", "Total number of cached sessions invalidated, labeled by reason.", &["reason"]).unwrap();

    // --- Operations ---
    /// High-level operations currently holding a concurrency permit.
    pub static ref OPERATIONS_IN_FLIGHT: Gauge =
        register_gauge!("zksession_operations_in_flight", "Number of operations currently in flight.").unwrap();
    /// Attempts made after a failed first attempt.
    pub static ref RETRIES_TOTAL: Counter =
        register_counter!("zksession_retries_total", "Total number of operation retries.").unwrap();
    /// Operations that used every attempt without success.
    pub static ref RETRIES_EXHAUSTED_TOTAL: Counter =
        register_counter!("zksession_retries_exhausted_total", "Total number of operations that exhausted their retries.").unwrap();
}

/// Label values for `SESSION_INVALIDATIONS_TOTAL`.
pub mod reason {
    pub const SESSION_CLOSED: &str = "session_closed";
    pub const DISCONNECTED: &str = "disconnected";
    pub const EXPIRED: &str = "expired";
    pub const CLOSED_BY_CALLER: &str = "closed_by_caller";
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
