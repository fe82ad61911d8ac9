//! Messaging core: validate, persist, then push.
//!
//! Every `send_message` follows the same fixed order: the row is durable
//! before anyone hears about it. A missed push is a delivery gap the client
//! recovers from via conversation history, never a send failure.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use missive_shared::protocol::{MessagePayload, SendMessagePayload, UserTypingPayload};
use missive_shared::{ServerEvent, UserId};
use missive_store::{Attachment, ChatStore, Message, NewMessage, StoreError};

use crate::registry::PresenceRegistry;

/// History page size when the client does not ask for one.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Why a `send_message` was refused.
#[derive(Debug, Error)]
pub enum SendError {
    /// The frame was well-formed but semantically unacceptable; nothing was
    /// persisted.
    #[error("{0}")]
    Validation(String),

    /// The store refused the write; nothing was pushed.
    #[error("Failed to send message")]
    Persistence(#[from] StoreError),
}

/// Validates, persists and routes direct messages and typing indicators.
pub struct MessageRouter {
    store: Arc<dyn ChatStore>,
    registry: Arc<PresenceRegistry>,
    public_base_url: String,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<PresenceRegistry>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            public_base_url: public_base_url.into(),
        }
    }

    /// Handle one `send_message` frame.
    ///
    /// The receiver (when online) gets `receive_message`; the sender's own
    /// connection gets a `message_sent` echo carrying the persisted row.
    pub async fn send(
        &self,
        sender: UserId,
        payload: SendMessagePayload,
    ) -> Result<Message, SendError> {
        let receiver_id = payload.receiver_id;

        let content = payload
            .content
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_string();

        // The attachment group keys off the URL; a blank URL counts as
        // absent, and companions missing on the wire are stored as their
        // empty defaults.
        let attachment = payload
            .attachment_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| Attachment {
                url,
                mime_type: payload.attachment_type.unwrap_or_default(),
                name: payload.attachment_name.unwrap_or_default(),
                size: payload.attachment_size.unwrap_or(0),
            });

        if content.is_empty() && attachment.is_none() {
            return Err(SendError::Validation(
                "Message content or attachment is required".to_string(),
            ));
        }

        if self.store.find_user(receiver_id).await?.is_none() {
            return Err(SendError::Validation("Receiver not found".to_string()));
        }

        let message = self
            .store
            .insert_message(NewMessage {
                sender_id: sender,
                receiver_id,
                content,
                attachment,
            })
            .await?;

        if let Some(conn) = self.registry.lookup(receiver_id) {
            if !conn.send(ServerEvent::ReceiveMessage(self.message_payload(&message))) {
                debug!(
                    user = %receiver_id.short(),
                    "Dropped receive_message for closing connection"
                );
            }
        }

        if let Some(conn) = self.registry.lookup(sender) {
            if !conn.send(ServerEvent::MessageSent(self.message_payload(&message))) {
                debug!(
                    user = %sender.short(),
                    "Dropped message_sent echo for closing connection"
                );
            }
        }

        debug!(
            from = %sender.short(),
            to = %receiver_id.short(),
            message = %message.id,
            "Routed message"
        );

        Ok(message)
    }

    /// Flip every unread message from `sender` to `receiver` to read.
    /// Idempotent; returns how many rows changed.
    pub async fn mark_read(&self, sender: UserId, receiver: UserId) -> Result<u64, StoreError> {
        self.store.mark_conversation_read(sender, receiver).await
    }

    /// Fetch one page of the conversation between `a` and `b` for client
    /// delivery: stored newest-first, reversed to chronological, attachment
    /// URLs absolutized. A missing or zero limit falls back to the default
    /// page size.
    pub async fn history(
        &self,
        a: UserId,
        b: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<MessagePayload>, StoreError> {
        let limit = limit.filter(|n| *n > 0).unwrap_or(DEFAULT_HISTORY_LIMIT);
        let messages = self.store.conversation(a, b, limit).await?;

        Ok(messages.iter().rev().map(|m| self.message_payload(m)).collect())
    }

    /// Relay a typing indicator to its recipient. Ephemeral: dropped
    /// silently when the recipient is offline.
    pub fn typing_notify(&self, from: UserId, from_username: &str, to: UserId, is_typing: bool) {
        let Some(conn) = self.registry.lookup(to) else {
            return;
        };

        let delivered = conn.send(ServerEvent::UserTyping(UserTypingPayload {
            user_id: from,
            username: from_username.to_string(),
            is_typing,
        }));

        if !delivered {
            debug!(user = %to.short(), "Dropped typing indicator for closing connection");
        }
    }

    /// Convert a stored message to its wire shape, absolutizing the
    /// attachment URL against the server's public base.
    fn message_payload(&self, message: &Message) -> MessagePayload {
        let attachment = message.attachment.as_ref();
        MessagePayload {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            attachment_url: attachment.map(|a| absolute_url(&self.public_base_url, &a.url)),
            attachment_type: attachment.map(|a| a.mime_type.clone()),
            attachment_name: attachment.map(|a| a.name.clone()),
            attachment_size: attachment.map(|a| a.size),
            is_read: message.is_read,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// Absolutize a stored attachment URL against the public base. URLs that
/// already carry a scheme pass through untouched.
pub(crate) fn absolute_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}
