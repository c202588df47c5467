//! Opening and authenticating the upstream transport.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::endpoint::UpstreamConfig;
use crate::error::MuxError;
use crate::frame::Frame;
use crate::protocol::{AuthMessage, HandshakeReply};

pub(crate) type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolve, connect and authenticate. The returned stream is ready to relay.
pub(crate) async fn open(config: &UpstreamConfig) -> Result<UpstreamStream, MuxError> {
    let url = config.websocket_url()?;
    debug!(%url, "Connecting to upstream");

    let (mut stream, _response) =
        tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| MuxError::ConnectTimeout(config.connect_timeout))??;

    let auth = AuthMessage::new(config.access_token.as_str()).to_frame()?;
    stream.send(Message::from(auth)).await?;

    tokio::time::timeout(config.handshake_timeout, await_auth_result(&mut stream))
        .await
        .map_err(|_| MuxError::HandshakeTimeout(config.handshake_timeout))??;

    info!(%url, "Upstream session authenticated");
    Ok(stream)
}

async fn await_auth_result(stream: &mut UpstreamStream) -> Result<(), MuxError> {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Upstream closed during handshake");
                return Err(MuxError::HandshakeClosed);
            }
            Ok(message) => message,
            Err(e) => {
                warn!("Upstream errored during handshake: {}", e);
                return Err(MuxError::HandshakeClosed);
            }
        };

        let Some(frame) = Frame::from_message(message) else {
            continue;
        };

        match HandshakeReply::parse(&frame) {
            Some(HandshakeReply::AuthOk) => return Ok(()),
            Some(HandshakeReply::AuthInvalid { message }) => {
                return Err(MuxError::HandshakeRejected(
                    message.unwrap_or_else(|| "invalid access token".to_string()),
                ));
            }
            Some(HandshakeReply::AuthRequired) => {}
            None => debug!("Ignoring {} byte frame received before auth_ok", frame.len()),
        }
    }

    Err(MuxError::HandshakeClosed)
}
