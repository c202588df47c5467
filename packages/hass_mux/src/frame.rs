//! Payloads carried by the relay.
//!
//! The multiplexer never looks inside a [`Frame`]; it only keeps the
//! text/binary distinction of the transport so that what goes in on one side
//! comes out byte-for-byte on the other.

use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};

/// Close code sent to every client when the upstream session is lost.
pub const UPSTREAM_LOST_CODE: u16 = 1012;
pub const UPSTREAM_LOST_REASON: &str = "Home Assistant websocket closed";

/// Close code used when the hosting process tears the multiplexer down.
pub const SHUTTING_DOWN_CODE: u16 = 1001;
pub const SHUTTING_DOWN_REASON: &str = "Edge proxy shutting down";

/// One opaque message relayed between upstream and clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Frame {
    pub fn text(text: impl Into<Utf8Bytes>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Raw payload bytes, regardless of frame kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => &data[..],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extract a relayable frame from a transport message.
    ///
    /// Control messages (ping, pong, close, raw frames) are not relayed and
    /// yield `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

/// Close code and reason delivered to a client whose session is ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    pub code: u16,
    pub reason: String,
}

impl CloseNotice {
    pub fn upstream_lost() -> Self {
        Self {
            code: UPSTREAM_LOST_CODE,
            reason: UPSTREAM_LOST_REASON.to_string(),
        }
    }

    pub fn shutting_down() -> Self {
        Self {
            code: SHUTTING_DOWN_CODE,
            reason: SHUTTING_DOWN_REASON.to_string(),
        }
    }
}

impl From<CloseNotice> for CloseFrame {
    fn from(notice: CloseNotice) -> Self {
        CloseFrame {
            code: notice.code.into(),
            reason: notice.reason.into(),
        }
    }
}

/// Item in a client's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Close the client with this code/reason; nothing follows it.
    Close(CloseNotice),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_keeps_kind_through_message() {
        let frame = Frame::text(r#"{"id":1,"type":"ping"}"#);
        let message: Message = frame.clone().into();
        assert!(message.is_text());
        assert_eq!(Frame::from_message(message), Some(frame));
    }

    #[test]
    fn binary_frame_is_not_coerced_to_text() {
        let payload = vec![0u8, 159, 146, 150, 255];
        let frame = Frame::binary(payload.clone());
        let message: Message = frame.clone().into();
        assert!(message.is_binary());
        let back = Frame::from_message(message).unwrap();
        assert_eq!(back.as_bytes(), payload.as_slice());
        assert!(matches!(back, Frame::Binary(_)));
    }

    #[test]
    fn control_messages_are_not_relayed() {
        assert_eq!(Frame::from_message(Message::Ping(Bytes::new())), None);
        assert_eq!(Frame::from_message(Message::Pong(Bytes::new())), None);
        assert_eq!(Frame::from_message(Message::Close(None)), None);
    }

    #[test]
    fn upstream_lost_notice_uses_service_restart_code() {
        let notice = CloseNotice::upstream_lost();
        assert_eq!(notice.code, 1012);
        assert_eq!(notice.reason, "Home Assistant websocket closed");

        let frame: CloseFrame = notice.into();
        assert_eq!(u16::from(frame.code), 1012);
        assert_eq!(frame.reason.as_str(), "Home Assistant websocket closed");
    }

    #[test]
    fn empty_frames() {
        assert!(Frame::text("").is_empty());
        assert_eq!(Frame::binary(vec![1, 2, 3]).len(), 3);
    }
}
