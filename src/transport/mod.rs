//! Streaming transports
//!
//! A transport opens one `RunChannel` per run. The coordinator only consumes the
//! channel's message sequence, so the push mechanism underneath can change freely.

use async_trait::async_trait;

use crate::core::errors::Result;

pub mod channel;
pub mod loopback;
pub mod protocol;
pub mod sse;

pub use channel::{MessageStream, RunChannel};
pub use loopback::{loopback, loopback_from_config, LoopbackRun, LoopbackServer, LoopbackTransport};
pub use protocol::{decode_frame, AnswerFrame, ComparisonPayload, StreamMessage, END_MARKER};
pub use sse::{decode_event_stream, SseDecoder, SseTransport};

/// Opens the push channel for a comparison run
#[async_trait]
pub trait ComparisonTransport: Send + Sync {
    async fn open(&self, payload: &ComparisonPayload) -> Result<RunChannel>;
}
