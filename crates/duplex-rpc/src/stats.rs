//! Endpoint statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one endpoint.
#[derive(Debug, Default)]
pub struct RpcStats {
    /// Outbound calls issued
    pub calls_issued: AtomicU64,
    /// Results matched to a pending call
    pub results_received: AtomicU64,
    /// Calls failed by their timer
    pub timeouts: AtomicU64,
    /// Inbound requests served
    pub requests_served: AtomicU64,
    /// Rejections sent back to the other side
    pub rejections_sent: AtomicU64,
    /// Results that matched no pending call
    pub stray_results: AtomicU64,
    /// Ephemeral handlers evicted by the collector
    pub handlers_collected: AtomicU64,
    /// Inbound messages that carried the marker but failed to decode
    pub malformed_messages: AtomicU64,
}

impl RpcStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Plain copy of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls_issued: self.calls_issued.load(Ordering::Relaxed),
            results_received: self.results_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            requests_served: self.requests_served.load(Ordering::Relaxed),
            rejections_sent: self.rejections_sent.load(Ordering::Relaxed),
            stray_results: self.stray_results.load(Ordering::Relaxed),
            handlers_collected: self.handlers_collected.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RpcStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub calls_issued: u64,
    pub results_received: u64,
    pub timeouts: u64,
    pub requests_served: u64,
    pub rejections_sent: u64,
    pub stray_results: u64,
    pub handlers_collected: u64,
    pub malformed_messages: u64,
}
