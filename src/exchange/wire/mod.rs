//! Wire protocol: frame decoding and event interpretation.

pub mod event;
pub mod frame_decoder;

pub use event::{ExchangeEvent, interpret};
pub use frame_decoder::{FrameDecoder, StreamFrame, decode_stream};
