//! Frame text ↔ [`Message`] codec.
//!
//! One JSON object per frame.  Decoding fails on invalid JSON, a missing
//! or empty `id`, or an empty `kind`; unknown fields are ignored.
//! Encoding a well-formed record never fails in practice.

use crate::message::Message;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message id is missing or empty")]
    MissingId,
}

/// Serialize a message to its wire frame.
pub fn encode(message: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Parse one wire frame.
pub fn decode(text: &str) -> Result<Message, CodecError> {
    let message: Message = serde_json::from_str(text)?;
    if message.id.is_empty() {
        return Err(CodecError::MissingId);
    }
    Ok(message)
}
