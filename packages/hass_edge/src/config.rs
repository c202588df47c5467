use anyhow::{Context, Result, bail};
use hass_mux::{UpstreamConfig, resolve_websocket_url};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [upstream]
//                    access_token = "..."
//
//   env var:         HASS_EDGE_UPSTREAM__ACCESS_TOKEN=...   (double underscore = nesting)
//
//   (single underscore stays within field names: HASS_EDGE_REST__TIMEOUT_SECS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub upstream: UpstreamFileConfig,
    #[serde(default)]
    pub rest: RestFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Home Assistant instance to proxy (lives under `[upstream]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamFileConfig {
    /// Base URL, e.g. `http://homeassistant.local:8123`
    #[serde(default)]
    pub url: Option<String>,
    /// Long-lived access token
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for UpstreamFileConfig {
    fn default() -> Self {
        Self {
            url: None,
            access_token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

/// REST passthrough (lives under `[rest]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestFileConfig {
    #[serde(default = "default_rest_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rest_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RestFileConfig {
    fn default() -> Self {
        Self {
            enabled: default_rest_enabled(),
            timeout_secs: default_rest_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_rest_enabled() -> bool {
    true
}
fn default_rest_timeout_secs() -> u64 {
    30
}

/// Build a figment that layers: defaults → config.toml → HASS_EDGE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `HASS_EDGE_UPSTREAM__URL=http://ha:8123`  →  `upstream.url = "http://ha:8123"`
///   `HASS_EDGE_SERVER__PORT=9000`  →  `server.port = 9000`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("HASS_EDGE_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

impl UpstreamFileConfig {
    /// Validate and convert into the multiplexer's settings.
    ///
    /// A missing URL or token is fatal at startup, as is a URL that cannot be
    /// turned into a websocket address.
    pub fn to_upstream_config(&self) -> Result<UpstreamConfig> {
        let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            bail!("upstream.url is not set (config.toml [upstream] url or HASS_EDGE_UPSTREAM__URL)");
        };
        let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) else {
            bail!(
                "upstream.access_token is not set (config.toml [upstream] access_token or HASS_EDGE_UPSTREAM__ACCESS_TOKEN)"
            );
        };

        resolve_websocket_url(url).context("Invalid upstream.url")?;

        Ok(UpstreamConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ..UpstreamConfig::new(url.trim(), token)
        })
    }
}

/// REST passthrough configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RestConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn from_file(fc: &RestFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
            timeout: Duration::from_secs(fc.timeout_secs),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct EdgeConfig {
    pub data_dir: PathBuf,
}

impl EdgeConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".hass-edge"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn load(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Failed to load {}", self.config_toml_path().display()))
    }
}
