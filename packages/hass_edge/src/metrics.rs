//! Server metrics for observability
//!
//! HTTP-side counters. Relay counters live in the multiplexer and are
//! reported next to these by the `/metrics` endpoint.

use hass_mux::{MuxMetricsSnapshot, SessionState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active client WebSockets
    pub active_connections: AtomicU64,
    /// Total client WebSockets since server start
    pub total_connections: AtomicU64,
    /// Upgrade requests refused because no upstream session could be had
    pub rejected_connections: AtomicU64,

    // Message metrics
    /// WebSocket messages received from clients
    pub messages_received: AtomicU64,
    /// WebSocket messages sent to clients
    pub messages_sent: AtomicU64,
    /// Client messages dropped because the upstream was not live
    pub messages_dropped: AtomicU64,

    // REST passthrough
    pub rest_requests: AtomicU64,
    /// Passthrough requests that failed to reach the upstream
    pub rest_errors: AtomicU64,

    // Error metrics
    pub websocket_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // REST tracking
    pub fn rest_request(&self) {
        self.rest_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rest_error(&self) {
        self.rest_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                rejected: self.rejected_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                sent: self.messages_sent.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
            },
            rest: RestMetrics {
                requests: self.rest_requests.load(Ordering::Relaxed),
                errors: self.rest_errors.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub rest: RestMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestMetrics {
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub websocket: u64,
}

/// Body of `/metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub server: MetricsSnapshot,
    pub relay: MuxMetricsSnapshot,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub upstream: UpstreamHealth,
    pub clients: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub state: SessionState,
    pub live: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = ServerMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_rejections_do_not_count_as_connections() {
        let metrics = ServerMetrics::new();
        metrics.connection_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.rejected, 1);
        assert_eq!(snapshot.connections.total, 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.message_received();
        metrics.message_sent();
        metrics.message_dropped();
        metrics.rest_request();
        metrics.rest_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.messages.received, 1);
        assert_eq!(snapshot.messages.sent, 1);
        assert_eq!(snapshot.messages.dropped, 1);
        assert_eq!(snapshot.rest.requests, 1);
        assert_eq!(snapshot.rest.errors, 1);
        assert_eq!(snapshot.errors.websocket, 0);
    }

    #[test]
    fn test_health_status_shape() {
        let health = HealthStatus {
            status: "healthy".into(),
            upstream: UpstreamHealth {
                state: SessionState::Live,
                live: true,
            },
            clients: 2,
            uptime_secs: 5,
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["upstream"]["state"], "LIVE");
        assert_eq!(json["clients"], 2);
    }
}
