//! REST passthrough to the upstream `/api/*` endpoints.
//!
//! Requests are replayed with the proxy's own bearer token so downstream
//! callers never need the upstream credential.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::http::{HeaderValue, Method, header::CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

pub struct RestProxy {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl RestProxy {
    pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build REST passthrough client")?;
        Ok(Self {
            client,
            base_url: rest_base_url(base_url),
            access_token: access_token.to_string(),
        })
    }

    /// Upstream URL for `path` (relative to `/api/`) plus the raw query.
    ///
    /// Returns `None` when the resolved URL would land outside the upstream's
    /// `/api/` tree, e.g. through `..` segments in an already-decoded path.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Option<Url> {
        let mut raw = format!("{}/api/{}", self.base_url, path.trim_start_matches('/'));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            raw.push('?');
            raw.push_str(query);
        }

        // Compare after parsing: dot segments are only resolved by the parser
        let url = Url::parse(&raw).ok()?;
        let scope = Url::parse(&format!("{}/api/", self.base_url)).ok()?;
        (url.origin() == scope.origin() && url.path().starts_with(scope.path())).then_some(url)
    }

    pub async fn forward(
        &self,
        method: Method,
        url: Url,
        content_type: Option<&HeaderValue>,
        body: Bytes,
    ) -> Result<reqwest::Response, reqwest::Error> {
        debug!(%method, %url, "REST passthrough");

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.access_token);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type.clone());
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        request.send().await
    }
}

/// HTTP base of the upstream, whatever form the websocket base was given in.
pub fn rest_base_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = base.strip_suffix("/api/websocket").unwrap_or(base);

    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_is_kept() {
        assert_eq!(
            rest_base_url("http://homeassistant.local:8123/"),
            "http://homeassistant.local:8123"
        );
    }

    #[test]
    fn websocket_base_maps_back_to_http() {
        assert_eq!(
            rest_base_url("wss://home.example.com/api/websocket"),
            "https://home.example.com"
        );
        assert_eq!(rest_base_url("ws://10.0.0.2:8123"), "http://10.0.0.2:8123");
    }

    fn proxy(base: &str) -> RestProxy {
        RestProxy::new(base, "t", Duration::from_secs(1)).unwrap()
    }

    fn target(proxy: &RestProxy, path: &str, query: Option<&str>) -> Option<String> {
        proxy.target_url(path, query).map(|url| url.to_string())
    }

    #[test]
    fn target_url_joins_path_and_query() {
        let proxy = proxy("http://ha:8123");
        assert_eq!(
            target(&proxy, "states", None).as_deref(),
            Some("http://ha:8123/api/states")
        );
        assert_eq!(
            target(&proxy, "/history/period", Some("filter_entity_id=sun.sun")).as_deref(),
            Some("http://ha:8123/api/history/period?filter_entity_id=sun.sun")
        );
        assert_eq!(
            target(&proxy, "config", Some("")).as_deref(),
            Some("http://ha:8123/api/config")
        );
    }

    #[test]
    fn target_url_stays_inside_api_tree() {
        let proxy = proxy("http://ha:8123");
        for path in [
            "../auth/token",
            "..",
            "states/../../auth/token",
            "%2e%2e/auth/token",
            "..\\auth\\token",
        ] {
            assert_eq!(target(&proxy, path, None), None, "{path}");
        }

        // Dot segments that resolve back inside the tree are fine
        assert_eq!(
            target(&proxy, "states/../config", None).as_deref(),
            Some("http://ha:8123/api/config")
        );
    }

    #[test]
    fn target_url_respects_a_base_path_prefix() {
        let proxy = proxy("https://home.example.com/ha/");
        assert_eq!(
            target(&proxy, "states", None).as_deref(),
            Some("https://home.example.com/ha/api/states")
        );
        assert_eq!(target(&proxy, "../../admin", None), None);
    }
}
