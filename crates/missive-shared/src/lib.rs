//! # missive-shared
//!
//! Types shared by every missive crate: opaque identifiers, the JSON wire
//! protocol spoken over the live WebSocket channel, and the errors produced
//! while decoding it.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ClientEvent, ServerEvent};
pub use types::{ConnId, UserId};
