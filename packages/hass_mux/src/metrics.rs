//! Relay counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MuxMetrics {
    // Upstream session
    /// Upstream sessions successfully authenticated
    pub upstream_connects: AtomicU64,
    /// Connect attempts that failed (resolve, transport, handshake)
    pub upstream_connect_failures: AtomicU64,
    /// Live sessions lost to a remote close or transport error
    pub upstream_losses: AtomicU64,

    // Clients
    pub clients_accepted: AtomicU64,
    /// Connect requests refused because no live session could be had
    pub clients_rejected: AtomicU64,
    pub clients_removed: AtomicU64,

    // Traffic
    /// Per-client deliveries of upstream frames
    pub frames_to_clients: AtomicU64,
    pub frames_to_upstream: AtomicU64,
    /// Client frames dropped because no live session existed
    pub frames_dropped: AtomicU64,
    /// Enqueue failures on clients that were already closing
    pub client_send_failures: AtomicU64,
}

impl MuxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MuxMetricsSnapshot {
        MuxMetricsSnapshot {
            upstream: UpstreamMetrics {
                connects: self.upstream_connects.load(Ordering::Relaxed),
                connect_failures: self.upstream_connect_failures.load(Ordering::Relaxed),
                losses: self.upstream_losses.load(Ordering::Relaxed),
            },
            clients: ClientMetrics {
                accepted: self.clients_accepted.load(Ordering::Relaxed),
                rejected: self.clients_rejected.load(Ordering::Relaxed),
                removed: self.clients_removed.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                to_clients: self.frames_to_clients.load(Ordering::Relaxed),
                to_upstream: self.frames_to_upstream.load(Ordering::Relaxed),
                dropped: self.frames_dropped.load(Ordering::Relaxed),
                client_send_failures: self.client_send_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of relay counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxMetricsSnapshot {
    pub upstream: UpstreamMetrics,
    pub clients: ClientMetrics,
    pub frames: FrameMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamMetrics {
    pub connects: u64,
    pub connect_failures: u64,
    pub losses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetrics {
    pub accepted: u64,
    pub rejected: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub to_clients: u64,
    pub to_upstream: u64,
    pub dropped: u64,
    pub client_send_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = MuxMetrics::new();
        MuxMetrics::incr(&metrics.upstream_connects);
        MuxMetrics::incr(&metrics.clients_accepted);
        MuxMetrics::incr(&metrics.clients_accepted);
        MuxMetrics::add(&metrics.frames_to_clients, 5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.upstream.connects, 1);
        assert_eq!(snapshot.clients.accepted, 2);
        assert_eq!(snapshot.frames.to_clients, 5);
        assert_eq!(snapshot.frames.dropped, 0);
    }
}
