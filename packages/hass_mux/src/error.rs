use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors surfaced by the multiplexer.
///
/// Everything except [`MuxError::ShuttingDown`] is a connect-time failure:
/// it aborts the current attempt and is only retried when the next client
/// asks for a session.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The configured base URL cannot be turned into a websocket address
    #[error("invalid upstream endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Transport-level connect failed (DNS, refused, TLS, HTTP upgrade)
    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] Box<tungstenite::Error>),

    #[error("upstream connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Upstream answered the auth message with `auth_invalid`
    #[error("upstream rejected authentication: {0}")]
    HandshakeRejected(String),

    #[error("upstream did not complete authentication within {0:?}")]
    HandshakeTimeout(Duration),

    /// Upstream went away before answering the auth message
    #[error("upstream closed the connection during authentication")]
    HandshakeClosed,

    #[error("protocol payload error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Every registration attempt raced an upstream teardown
    #[error("upstream session unavailable")]
    UpstreamUnavailable,

    #[error("multiplexer is shutting down")]
    ShuttingDown,
}

impl From<tungstenite::Error> for MuxError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Connect(Box::new(err))
    }
}

impl MuxError {
    /// True when the failure happened while reaching or authenticating upstream.
    pub fn is_connect_failure(&self) -> bool {
        !matches!(self, Self::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutting_down_is_not_a_connect_failure() {
        assert!(!MuxError::ShuttingDown.is_connect_failure());
        assert!(MuxError::HandshakeClosed.is_connect_failure());
        assert!(MuxError::UpstreamUnavailable.is_connect_failure());
    }

    #[test]
    fn tungstenite_errors_become_connect_errors() {
        let err: MuxError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, MuxError::Connect(_)));
        assert!(err.to_string().starts_with("failed to connect to upstream"));
    }

    #[test]
    fn rejection_message_is_displayed() {
        let err = MuxError::HandshakeRejected("Invalid access token".into());
        assert_eq!(
            err.to_string(),
            "upstream rejected authentication: Invalid access token"
        );
    }
}
