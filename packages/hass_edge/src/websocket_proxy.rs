use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use hass_mux::{ClientSession, CloseNotice, Frame, Multiplexer, Outbound};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::ServerMetrics;

/// Socket message for a relayed frame. Text stays text, binary stays binary.
pub fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.as_str().to_owned().into()),
        Frame::Binary(data) => Message::Binary(data),
    }
}

/// Relayable frame for a socket message; control messages yield `None`.
pub fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::text(text.as_str().to_owned())),
        Message::Binary(data) => Some(Frame::binary(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

pub fn close_message(notice: CloseNotice) -> Message {
    Message::Close(Some(CloseFrame {
        code: notice.code,
        reason: notice.reason.into(),
    }))
}

/// Bridge one upgraded client socket to its multiplexer session.
///
/// Runs until either side ends: the relay closing the client (upstream lost
/// or shutdown), or the client going away. The client is removed from the
/// active set on the way out.
pub async fn handle_client(
    socket: WebSocket,
    mux: Multiplexer,
    mut session: ClientSession,
    metrics: Arc<ServerMetrics>,
) {
    let client_id = session.id();
    metrics.connection_opened();
    debug!(client = %client_id, "Client websocket established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to drain the relay queue into the socket
    let sender_metrics = metrics.clone();
    let sender_task = async move {
        while let Some(item) = session.recv().await {
            match item {
                Outbound::Frame(frame) => {
                    if ws_sender.send(frame_to_message(frame)).await.is_err() {
                        break;
                    }
                    sender_metrics.message_sent();
                }
                Outbound::Close(notice) => {
                    debug!(client = %client_id, code = notice.code, "Closing client");
                    let _ = ws_sender.send(close_message(notice)).await;
                    break;
                }
            }
        }
    };

    // Task to forward client messages upstream
    let input_mux = mux.clone();
    let input_metrics = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!(client = %client_id, "Client closed connection");
                    break;
                }
                Ok(message) => {
                    let Some(frame) = message_to_frame(message) else {
                        continue;
                    };
                    input_metrics.message_received();
                    if !input_mux.forward(client_id, frame).await {
                        input_metrics.message_dropped();
                    }
                }
                Err(e) => {
                    warn!(client = %client_id, "WebSocket error from client: {}", e);
                    input_metrics.websocket_error();
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("Sender task ended"),
        _ = input_task => debug!("Input task ended"),
    }

    mux.remove_client(client_id).await;
    metrics.connection_closed();
    debug!(client = %client_id, "Client websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_stay_text() {
        let message = frame_to_message(Frame::text(r#"{"id":1,"type":"ping"}"#));
        match &message {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"id":1,"type":"ping"}"#),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(
            message_to_frame(message),
            Some(Frame::text(r#"{"id":1,"type":"ping"}"#))
        );
    }

    #[test]
    fn binary_frames_stay_binary() {
        let payload = vec![0u8, 255, 10];
        let message = frame_to_message(Frame::binary(payload.clone()));
        assert!(matches!(message, Message::Binary(_)));
        assert_eq!(message_to_frame(message), Some(Frame::binary(payload)));
    }

    #[test]
    fn control_messages_are_not_forwarded() {
        assert_eq!(message_to_frame(Message::Ping(Default::default())), None);
        assert_eq!(message_to_frame(Message::Close(None)), None);
    }

    #[test]
    fn close_notice_becomes_close_frame() {
        match close_message(CloseNotice::upstream_lost()) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1012);
                assert_eq!(frame.reason.as_str(), "Home Assistant websocket closed");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }
}
