use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::UserId;

/// Events a client may send over the live channel.
///
/// Frames are JSON text messages shaped as `{"event": "...", "data": {...}}`;
/// payload keys are camelCase for the JavaScript clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Send a direct message to another user.
    SendMessage(SendMessagePayload),

    /// Typing indicator aimed at one recipient.
    Typing(TypingPayload),

    /// Explicit sign-out; the server closes the connection.
    Logout,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message addressed to this connection's user.
    ReceiveMessage(MessagePayload),

    /// Echo of a message this connection just sent, confirming persistence.
    MessageSent(MessagePayload),

    /// Another user started or stopped typing to this user.
    UserTyping(UserTypingPayload),

    /// A user's presence changed; broadcast to every live connection.
    UserStatusChanged(PresenceUpdate),

    /// Processing of an inbound event failed; the connection stays open.
    Error(ErrorPayload),
}

/// Payload of a `send_message` event.
///
/// The attachment fields travel flat for the clients' convenience; the server
/// re-groups them and rejects frames where both `content` and
/// `attachmentUrl` are missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: UserId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_type: Option<String>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_size: Option<i64>,
}

/// Payload of a `typing` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub receiver_id: UserId,
    pub is_typing: bool,
}

/// A full message record as delivered to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Trimmed text body; empty string for attachment-only messages.
    pub content: String,
    /// Absolute URL of the attachment, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_size: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `user_typing` notification relayed to the recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub user_id: UserId,
    pub username: String,
    pub is_typing: bool,
}

/// User online/offline transition, ephemeral and never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub is_online: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

impl ClientEvent {
    /// Parse one inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEvent {
    /// Shorthand for an `error` event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_frame_decodes() {
        let receiver = UserId::new();
        let text = format!(
            r#"{{"event":"send_message","data":{{"receiverId":"{receiver}","content":"hi"}}}}"#
        );

        let event = ClientEvent::from_json(&text).unwrap();
        let ClientEvent::SendMessage(payload) = event else {
            panic!("expected send_message");
        };
        assert_eq!(payload.receiver_id, receiver);
        assert_eq!(payload.content.as_deref(), Some("hi"));
        assert!(payload.attachment_url.is_none());
    }

    #[test]
    fn test_logout_frame_decodes() {
        let event = ClientEvent::from_json(r#"{"event":"logout"}"#).unwrap();
        assert_eq!(event, ClientEvent::Logout);
    }

    #[test]
    fn test_typing_frame_roundtrip() {
        let event = ClientEvent::Typing(TypingPayload {
            receiver_id: UserId::new(),
            is_typing: true,
        });

        let json = event.to_json().unwrap();
        assert!(json.contains(r#""event":"typing""#));
        assert!(json.contains(r#""isTyping":true"#));
        assert_eq!(ClientEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_status_event_uses_camel_case_keys() {
        let event = ServerEvent::UserStatusChanged(PresenceUpdate {
            user_id: UserId::new(),
            is_online: false,
            timestamp: Utc::now(),
        });

        let json = event.to_json().unwrap();
        assert!(json.contains(r#""event":"user_status_changed""#));
        assert!(json.contains(r#""isOnline":false"#));
        assert!(json.contains(r#""userId""#));
    }

    #[test]
    fn test_message_payload_roundtrip() {
        let event = ServerEvent::ReceiveMessage(MessagePayload {
            id: Uuid::new_v4(),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            content: "bonjour".to_string(),
            attachment_url: None,
            attachment_type: None,
            attachment_name: None,
            attachment_size: None,
            is_read: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let json = event.to_json().unwrap();
        // Absent attachment fields are omitted entirely.
        assert!(!json.contains("attachmentUrl"));
        assert_eq!(ServerEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        assert!(matches!(
            ClientEvent::from_json("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        // Unknown event tags fail deserialization, same as broken JSON.
        assert!(matches!(
            ClientEvent::from_json(r#"{"event":"no_such_event"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
