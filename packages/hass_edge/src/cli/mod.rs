//! Client-side commands that talk to a running proxy over HTTP.

use anyhow::{Context, Result};
use hass_mux::MuxStatus;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy is unavailable at {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable(url.to_string())
        } else {
            Self::Other(err.into())
        }
    }
}

pub fn status_url(base_url: &str) -> String {
    format!("{}/api/websocket/status", base_url.trim_end_matches('/'))
}

pub async fn fetch_status(base_url: &str) -> Result<MuxStatus, ProxyError> {
    let url = status_url(base_url);
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| ProxyError::from_reqwest(base_url, e))?
        .error_for_status()
        .map_err(|e| ProxyError::from_reqwest(base_url, e))?;
    resp.json()
        .await
        .map_err(|e| ProxyError::from_reqwest(base_url, e))
}

pub fn format_status(status: &MuxStatus) -> String {
    let upstream = if status.upstream_live {
        "live"
    } else {
        "disconnected"
    };
    format!(
        "upstream: {}\nclients:  {}",
        upstream, status.active_client_count
    )
}

/// `hass-edge status` - print a running proxy's relay status
pub async fn status_command(base_url: &str, json: bool) -> Result<()> {
    let status = fetch_status(base_url)
        .await
        .with_context(|| format!("Failed to query {}", status_url(base_url)))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", format_status(&status));
    }
    Ok(())
}
