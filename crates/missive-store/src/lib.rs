//! # missive-store
//!
//! Durable persistence for the missive messaging backend: user accounts,
//! direct messages, read state, and the advisory online flag.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers, and [`SqliteStore`], an
//! async adapter implementing the [`ChatStore`] contract by running each
//! call on the blocking thread pool so the scheduler never stalls on disk
//! I/O.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::{ChatStore, SqliteStore};
