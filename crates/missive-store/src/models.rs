//! Domain model structs persisted in the missive database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to API responses where appropriate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use missive_shared::types::UserId;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user identifier, primary key.
    pub id: UserId,
    /// Display / login name, unique.
    pub username: String,
    /// Email address, unique and stored lowercased.
    pub email: String,
    /// Argon2 hash of the password (PHC string format).
    pub password_hash: String,
    /// Advisory persisted presence flag; the live registry is authoritative
    /// while the process runs.
    pub is_online: bool,
    /// Last time the user connected or disconnected.
    pub last_seen: DateTime<Utc>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// Last modification of the row.
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a [`User`]; id and timestamps are assigned by the
/// store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Public projection of a [`User`], safe to return to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_online: user.is_online,
            last_seen: user.last_seen,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Attachment descriptor carried by a message.
///
/// The group is all-or-nothing: a persisted message either has no attachment
/// or a fully populated one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// URL of the uploaded blob, stored as given (possibly relative to the
    /// server's public base).
    pub url: String,
    /// MIME type reported at upload time.
    pub mime_type: String,
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: i64,
}

/// A single direct message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// Author of the message.
    pub sender_id: UserId,
    /// Addressee of the message.
    pub receiver_id: UserId,
    /// Trimmed text body; empty string for attachment-only messages.
    pub content: String,
    /// Attachment descriptor, when one was sent.
    pub attachment: Option<Attachment>,
    /// Whether the receiver has read the message.
    pub is_read: bool,
    /// When the message was persisted.
    pub created_at: DateTime<Utc>,
    /// Last modification (creation, or the read-flag flip).
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to persist a [`Message`]; id, read flag and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub attachment: Option<Attachment>,
}
