use thiserror::Error;

/// Errors produced while encoding or decoding wire frames.
///
/// Unknown event tags surface as [`ProtocolError::Malformed`]: the tagged
/// envelope makes an unrecognized `event` a deserialization failure.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
