//! Async store contract consumed by the server.
//!
//! The messaging core talks to persistence exclusively through [`ChatStore`],
//! so routing logic never knows which engine sits behind it.  [`SqliteStore`]
//! is the production implementation: it owns the synchronous [`Database`]
//! behind a mutex and runs every call on tokio's blocking pool, keeping disk
//! I/O off the async scheduler.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use missive_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage, NewUser, User, UserProfile};

/// Durable-store operations required by the messaging core.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a message; the returned row carries the assigned id and
    /// timestamps.
    async fn insert_message(&self, new: NewMessage) -> Result<Message>;

    /// Messages between two users, newest first.
    async fn conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>>;

    /// Flip unread `sender` -> `receiver` messages to read; returns how many
    /// rows changed.
    async fn mark_conversation_read(&self, sender: UserId, receiver: UserId) -> Result<u64>;

    /// Unread messages addressed to `receiver`, across all senders.
    async fn unread_count(&self, receiver: UserId) -> Result<i64>;

    /// Advisory persisted presence flag; also refreshes `last_seen`.
    async fn set_online_status(&self, user: UserId, online: bool) -> Result<()>;

    async fn create_user(&self, new: NewUser) -> Result<User>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn list_users_except(&self, id: UserId) -> Result<Vec<UserProfile>>;
}

/// SQLite-backed [`ChatStore`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&db)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.with_db(move |db| db.insert_message(new)).await
    }

    async fn conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>> {
        self.with_db(move |db| db.conversation(a, b, limit)).await
    }

    async fn mark_conversation_read(&self, sender: UserId, receiver: UserId) -> Result<u64> {
        self.with_db(move |db| db.mark_conversation_read(sender, receiver))
            .await
    }

    async fn unread_count(&self, receiver: UserId) -> Result<i64> {
        self.with_db(move |db| db.unread_count(receiver)).await
    }

    async fn set_online_status(&self, user: UserId, online: bool) -> Result<()> {
        self.with_db(move |db| db.set_online_status(user, online))
            .await
    }

    async fn create_user(&self, new: NewUser) -> Result<User> {
        self.with_db(move |db| db.create_user(new)).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_db(move |db| db.find_user(id)).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_owned();
        self.with_db(move |db| db.find_user_by_email(&email)).await
    }

    async fn list_users_except(&self, id: UserId) -> Result<Vec<UserProfile>> {
        self.with_db(move |db| db.list_users_except(id)).await
    }
}
