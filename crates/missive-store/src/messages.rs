use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use missive_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{Attachment, Message, NewMessage};

impl Database {
    /// Persist a new message, assigning its id and timestamps.
    ///
    /// Returns the complete row exactly as a later fetch would see it.
    pub fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            attachment: new.attachment,
            is_read: false,
            created_at: now,
            updated_at: now,
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content,
                                   attachment_url, attachment_type, attachment_name, attachment_size,
                                   is_read, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.content,
                message.attachment.as_ref().map(|a| a.url.as_str()),
                message.attachment.as_ref().map(|a| a.mime_type.as_str()),
                message.attachment.as_ref().map(|a| a.name.as_str()),
                message.attachment.as_ref().map(|a| a.size),
                message.is_read,
                message.created_at.to_rfc3339(),
                message.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(message)
    }

    /// All messages between two users regardless of direction, newest first.
    pub fn conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, content,
                    attachment_url, attachment_type, attachment_name, attachment_size,
                    is_read, created_at, updated_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip every unread message from `sender` to `receiver` to read.
    ///
    /// Returns the number of rows updated; a second call is a no-op.
    pub fn mark_conversation_read(&self, sender: UserId, receiver: UserId) -> Result<u64> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET is_read = 1, updated_at = ?3
             WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![
                sender.to_string(),
                receiver.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected as u64)
    }

    /// Number of unread messages addressed to `receiver`, across all senders.
    pub fn unread_count(&self, receiver: UserId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND is_read = 0",
            params![receiver.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let attachment_url: Option<String> = row.get(4)?;
    let attachment_type: Option<String> = row.get(5)?;
    let attachment_name: Option<String> = row.get(6)?;
    let attachment_size: Option<i64> = row.get(7)?;
    let is_read: bool = row.get(8)?;
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = Uuid::parse_str(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = Uuid::parse_str(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    // The columns are written as a group; url presence decides the whole.
    let attachment = attachment_url.map(|url| Attachment {
        url,
        mime_type: attachment_type.unwrap_or_default(),
        name: attachment_name.unwrap_or_default(),
        size: attachment_size.unwrap_or_default(),
    });

    let created_at = parse_timestamp(&created_str, 9)?;
    let updated_at = parse_timestamp(&updated_str, 10)?;

    Ok(Message {
        id,
        sender_id: UserId(sender_id),
        receiver_id: UserId(receiver_id),
        content,
        attachment,
        is_read,
        created_at,
        updated_at,
    })
}

pub(crate) fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
