//! Home Assistant websocket multiplexer
//!
//! Shares one authenticated upstream websocket session between any number of
//! downstream clients. The session is opened on demand by the first client,
//! every upstream frame is fanned out to all clients, every client frame is
//! relayed upstream verbatim, and losing the upstream closes every client with
//! code 1012 so they reconnect (which opens a fresh session).
//!
//! This crate has no HTTP server dependencies; the hosting service drives each
//! client socket with a [`ClientSession`].
//!
//! # Example
//!
//! ```no_run
//! use hass_mux::{Frame, Multiplexer, Outbound, UpstreamConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mux = Multiplexer::new(UpstreamConfig::new(
//!         "http://homeassistant.local:8123",
//!         "long-lived-access-token",
//!     ));
//!
//!     let mut client = mux.accept_client().await.unwrap();
//!     mux.forward(client.id(), Frame::text(r#"{"id":1,"type":"ping"}"#))
//!         .await;
//!
//!     while let Some(item) = client.recv().await {
//!         match item {
//!             Outbound::Frame(frame) => println!("{:?}", frame),
//!             Outbound::Close(notice) => {
//!                 println!("closed: {} {}", notice.code, notice.reason);
//!                 break;
//!             }
//!         }
//!     }
//!     mux.remove_client(client.id()).await;
//! }
//! ```

mod endpoint;
mod error;
mod frame;
mod metrics;
mod multiplexer;
mod protocol;
mod registry;
mod upstream;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use endpoint::{UpstreamConfig, resolve_websocket_url};
pub use error::MuxError;
pub use frame::{
    CloseNotice, Frame, Outbound, SHUTTING_DOWN_CODE, SHUTTING_DOWN_REASON, UPSTREAM_LOST_CODE,
    UPSTREAM_LOST_REASON,
};
pub use metrics::{ClientMetrics, FrameMetrics, MuxMetrics, MuxMetricsSnapshot, UpstreamMetrics};
pub use multiplexer::{Multiplexer, SessionState};
pub use protocol::{AuthMessage, ConnectionInfo, HandshakeReply, MuxStatus};
pub use registry::{BroadcastReport, ClientId, ClientSession};
