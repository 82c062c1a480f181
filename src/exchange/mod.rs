//! Streaming conversation exchange engine.
//!
//! This module provides the client side of a streamed chat exchange:
//! - Frame decoding of the chunked `data:` protocol
//! - Typed exchange events
//! - An observable, speculative-aware session log
//! - The exchange controller (submit, stream, commit or roll back, cancel)
//! - An HTTP transport on `reqwest`

pub mod controller;
pub mod core;
pub mod session_store;
pub mod transport;
pub mod wire;

pub use controller::{ExchangeController, SubmitOutcome};
pub use self::core::config::EngineConfig;
pub use self::core::errors::{
    ConfigError, ExchangeError, ExchangeResult, FailureNotice, SessionError, TransportError,
};
pub use self::core::ids::{ExchangeId, MessageId, SessionId};
pub use self::core::message::{ChatSession, InFlightExchange, Message, MessageStatus, Sender};
pub use session_store::{IgnoreReason, SessionStore};
pub use transport::{ByteStream, HttpTransport, Transport, TransportFuture};
pub use wire::{ExchangeEvent, FrameDecoder, StreamFrame};
