//! `worldbus`: the message bus shared by the world orchestrator and its helpers.
//!
//! Every message travels inside a length-prefixed frame (see [`frame`]):
//! - outer framing: `u32` big-endian byte length + payload
//! - payload: a JSON [`topic::Envelope`] `{"topic", "user_id"?, "data"}`
//!
//! Inbound envelopes are decoded per topic into [`topic::Inbound`]; outbound events are built as
//! [`topic::Outbound`] and encoded back into envelopes.

pub mod frame;
pub mod topic;
pub mod user;

#[derive(Debug, Clone)]
pub enum ProtoError {
    UnknownTopic(String),
    Malformed { topic: String, reason: String },
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::UnknownTopic(t) => write!(f, "unknown topic: {t}"),
            ProtoError::Malformed { topic, reason } => {
                write!(f, "malformed {topic} payload: {reason}")
            }
        }
    }
}

impl std::error::Error for ProtoError {}
