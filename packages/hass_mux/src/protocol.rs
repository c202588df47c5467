//! The few payloads the multiplexer itself produces or understands.
//!
//! Everything else on the wire is opaque and relayed verbatim.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::Frame;

/// First message sent on a fresh upstream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "auth")]
pub struct AuthMessage {
    pub access_token: String,
}

impl AuthMessage {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Frame::text(serde_json::to_string(self)?))
    }
}

/// Upstream's answer during the auth handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeReply {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
}

impl HandshakeReply {
    /// Parse a handshake reply; frames that are not one are `None`.
    pub fn parse(frame: &Frame) -> Option<Self> {
        serde_json::from_slice(frame.as_bytes()).ok()
    }
}

/// Sent to every client right after it is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "connection_info")]
pub struct ConnectionInfo {
    #[serde(rename = "clientId")]
    pub client_id: Uuid,
    pub connected: bool,
}

impl ConnectionInfo {
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Frame::text(serde_json::to_string(self)?))
    }
}

/// Snapshot for the "report status" call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxStatus {
    pub active_client_count: usize,
    pub upstream_live: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_message_shape() {
        let json = serde_json::to_value(AuthMessage::new("llat-123")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "auth", "access_token": "llat-123"})
        );
    }

    #[test]
    fn handshake_replies() {
        assert_eq!(
            HandshakeReply::parse(&Frame::text(
                r#"{"type":"auth_required","ha_version":"2024.6.0"}"#
            )),
            Some(HandshakeReply::AuthRequired)
        );
        assert_eq!(
            HandshakeReply::parse(&Frame::text(r#"{"type":"auth_ok","ha_version":"2024.6.0"}"#)),
            Some(HandshakeReply::AuthOk)
        );
        assert_eq!(
            HandshakeReply::parse(&Frame::text(
                r#"{"type":"auth_invalid","message":"Invalid password"}"#
            )),
            Some(HandshakeReply::AuthInvalid {
                message: Some("Invalid password".into())
            })
        );
        assert_eq!(
            HandshakeReply::parse(&Frame::text(r#"{"type":"auth_invalid"}"#)),
            Some(HandshakeReply::AuthInvalid { message: None })
        );
    }

    #[test]
    fn non_handshake_frames_are_ignored() {
        assert_eq!(HandshakeReply::parse(&Frame::text("ping")), None);
        assert_eq!(
            HandshakeReply::parse(&Frame::text(r#"{"type":"event","id":3}"#)),
            None
        );
        assert_eq!(HandshakeReply::parse(&Frame::binary(vec![0xff, 0x00])), None);
    }

    #[test]
    fn connection_info_shape() {
        let id = Uuid::new_v4();
        let info = ConnectionInfo {
            client_id: id,
            connected: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "connection_info");
        assert_eq!(json["clientId"], id.to_string());
        assert_eq!(json["connected"], true);

        let back: ConnectionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn status_uses_camel_case() {
        let status = MuxStatus {
            active_client_count: 2,
            upstream_live: true,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"activeClientCount": 2, "upstreamLive": true})
        );
    }
}
