use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{any, get},
};
use clap::{Parser, Subcommand};
use hass_mux::Multiplexer;
use std::path::PathBuf;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod cli;
mod config;
mod handlers;
mod metrics;
mod rest_proxy;
pub mod websocket_proxy;

#[cfg(test)]
mod test_helpers;

use crate::config::{EdgeConfig, RestConfig};
use crate::metrics::ServerMetrics;
use crate::rest_proxy::RestProxy;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "hass-edge")]
#[command(about = "Edge proxy sharing one Home Assistant websocket between many clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.hass-edge)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the foreground (default)
    Serve(ServeArgs),

    /// Show the relay status of a running proxy
    Status(StatusArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Port for the web server (overrides [server] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides [server] host)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct StatusArgs {
    /// Base URL of the proxy (defaults to the configured listener)
    #[arg(long)]
    url: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// The shared upstream session and its clients
    pub mux: Multiplexer,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    /// REST passthrough; `None` when disabled
    pub rest: Option<Arc<RestProxy>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run_server(ServeArgs::default(), cli.data_dir).await,
        Some(Commands::Serve(args)) => run_server(args, cli.data_dir).await,
        Some(Commands::Status(args)) => {
            let url = match args.url {
                Some(url) => url,
                None => local_proxy_url(cli.data_dir)?,
            };
            cli::status_command(&url, args.json).await
        }
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "hass_edge=debug,hass_mux=debug,tower_http=debug,info"
    } else {
        "hass_edge=info,hass_mux=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

/// Listener address from the config file, for client commands.
fn local_proxy_url(data_dir: Option<PathBuf>) -> Result<String> {
    let file_config = EdgeConfig::new(data_dir)?.load()?;
    let host = match file_config.server.host.as_str() {
        "0.0.0.0" | "::" => "127.0.0.1".to_string(),
        host => host.to_string(),
    };
    Ok(format!("http://{}:{}", host, file_config.server.port))
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        // Client-facing websocket
        .route("/api/websocket", get(handlers::websocket_handler))
        .route(
            "/api/websocket/status",
            get(handlers::websocket_status_handler),
        )
        // REST passthrough
        .route("/api/ha/{*path}", any(handlers::rest_passthrough_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, data_dir: Option<PathBuf>) -> Result<()> {
    init_logging(args.debug);

    info!("Starting hass-edge");

    let edge_config = EdgeConfig::new(data_dir)?;
    let file_config = edge_config.load()?;

    let upstream = file_config
        .upstream
        .to_upstream_config()
        .context("Upstream is not configured")?;
    info!("Upstream: {}", upstream.websocket_url()?);

    let rest_config = RestConfig::from_file(&file_config.rest);
    let rest = if rest_config.enabled {
        Some(Arc::new(RestProxy::new(
            &upstream.base_url,
            &upstream.access_token,
            rest_config.timeout,
        )?))
    } else {
        info!("REST passthrough disabled");
        None
    };

    let mux = Multiplexer::new(upstream);
    let metrics = Arc::new(ServerMetrics::new());

    let app_state = AppState {
        mux: mux.clone(),
        metrics: metrics.clone(),
        rest,
    };
    let app = build_router(app_state);

    let host = args.host.unwrap_or(file_config.server.host);
    let port = args.port.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("hass-edge listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /api/websocket        - Shared Home Assistant websocket");
    info!("  GET    /api/websocket/status - Active clients and upstream state");
    info!("  ANY    /api/ha/*path         - REST passthrough");

    // Clients get their close frame before the listener stops
    let shutdown_mux = mux.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing client sessions...");
        let closed = shutdown_mux.shutdown().await;
        info!("Closed {} client sessions", closed);
    };

    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    wait_for_clients(&metrics, Duration::from_secs(5)).await;

    info!("Shutdown complete");
    server_result
}

/// Give client bridges a moment to flush their close frames.
async fn wait_for_clients(metrics: &ServerMetrics, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while metrics.snapshot().connections.active > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "{} client sockets still open at exit",
                metrics.snapshot().connections.active
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
