//! Typed events carried by decoded frames.

use serde::Deserialize;

use crate::exchange::core::errors::EXCHANGE_FAILED;
use crate::exchange::wire::frame_decoder::StreamFrame;

/// Event parsed from one frame payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExchangeEvent {
    /// Slice of assistant text to append.
    Chunk {
        /// Text to append to the running reply.
        content: String,
    },
    /// The reply is complete.
    Done,
    /// The server gave up on the reply.
    Error {
        /// Server-supplied reason.
        message: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Chunk {
        #[serde(default)]
        content: Option<String>,
    },
    Done,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<WireEvent> for ExchangeEvent {
    fn from(value: WireEvent) -> Self {
        match value {
            WireEvent::Chunk { content } => Self::Chunk {
                content: content.unwrap_or_default(),
            },
            WireEvent::Done => Self::Done,
            WireEvent::Error { message } => Self::Error {
                message: message.unwrap_or_else(|| EXCHANGE_FAILED.to_string()),
            },
        }
    }
}

/// Parse a frame into an event.
///
/// Malformed JSON and unknown `type` values are logged and dropped, so one
/// bad frame never fails an otherwise healthy stream.
#[must_use]
pub fn interpret(frame: &StreamFrame) -> Option<ExchangeEvent> {
    match serde_json::from_str::<WireEvent>(&frame.payload) {
        Ok(event) => Some(event.into()),
        Err(err) => {
            tracing::warn!(payload = %frame.payload, "dropping unreadable frame: {err}");
            None
        }
    }
}
