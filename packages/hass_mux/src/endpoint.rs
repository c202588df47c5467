use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::error::MuxError;

const WEBSOCKET_PATH: &str = "/api/websocket";

/// Where the upstream lives and how to authenticate against it.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// Base URL of the remote instance, e.g. `https://home.example.com`
    pub base_url: String,
    /// Long-lived access token sent in the auth handshake
    pub access_token: String,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn websocket_url(&self) -> Result<String, MuxError> {
        resolve_websocket_url(&self.base_url)
    }
}

// Hand-written so the token never ends up in logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Turn a base URL into the websocket address of its API endpoint.
///
/// `http` maps to `ws`, `https` to `wss`; `ws`/`wss` are kept. The API path
/// is appended unless the URL already points at it.
pub fn resolve_websocket_url(base_url: &str) -> Result<String, MuxError> {
    let invalid = |reason: &str| MuxError::InvalidEndpoint {
        url: base_url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = base_url
        .trim()
        .parse()
        .map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
            invalid(&e.to_string())
        })?;

    let scheme = match uri.scheme_str() {
        Some("http") | Some("ws") => "ws",
        Some("https") | Some("wss") => "wss",
        Some(other) => return Err(invalid(&format!("unsupported scheme {other:?}"))),
        None => return Err(invalid("missing scheme")),
    };

    let authority = uri
        .authority()
        .filter(|a| !a.host().is_empty())
        .ok_or_else(|| invalid("missing host"))?;

    let path = uri.path().trim_end_matches('/');
    let path = if path.ends_with(WEBSOCKET_PATH) {
        path.to_string()
    } else {
        format!("{path}{WEBSOCKET_PATH}")
    };

    Ok(format!("{scheme}://{authority}{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_maps_to_ws() {
        assert_eq!(
            resolve_websocket_url("http://homeassistant.local:8123").unwrap(),
            "ws://homeassistant.local:8123/api/websocket"
        );
    }

    #[test]
    fn https_base_maps_to_wss() {
        assert_eq!(
            resolve_websocket_url("https://home.example.com/").unwrap(),
            "wss://home.example.com/api/websocket"
        );
    }

    #[test]
    fn existing_websocket_path_is_kept() {
        assert_eq!(
            resolve_websocket_url("wss://home.example.com/api/websocket").unwrap(),
            "wss://home.example.com/api/websocket"
        );
        assert_eq!(
            resolve_websocket_url("ws://10.0.0.2:8123/api/websocket/").unwrap(),
            "ws://10.0.0.2:8123/api/websocket"
        );
    }

    #[test]
    fn path_prefix_is_preserved() {
        assert_eq!(
            resolve_websocket_url("https://proxy.example.com/ha").unwrap(),
            "wss://proxy.example.com/ha/api/websocket"
        );
    }

    #[test]
    fn bad_scheme_is_rejected() {
        let err = resolve_websocket_url("ftp://home.example.com").unwrap_err();
        assert!(matches!(err, MuxError::InvalidEndpoint { .. }));
    }

    #[test]
    fn missing_scheme_or_host_is_rejected() {
        assert!(resolve_websocket_url("home.example.com").is_err());
        assert!(resolve_websocket_url("").is_err());
        assert!(resolve_websocket_url("not a url").is_err());
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = UpstreamConfig::new("http://ha:8123", "secret-token");
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<redacted>"));
    }
}
