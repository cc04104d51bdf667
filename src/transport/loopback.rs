//! In-process transport
//!
//! Every `open` hands a `LoopbackRun` to the paired `LoopbackServer`, which plays
//! the comparison endpoint: it sees the payload and pushes frames back.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::config::TransportConfig;
use crate::core::errors::{CompareError, Result};
use crate::transport::channel::RunChannel;
use crate::transport::protocol::{decode_frame, ComparisonPayload, StreamMessage};
use crate::transport::ComparisonTransport;

/// Create a connected transport/server pair
pub fn loopback(buffer: usize) -> (LoopbackTransport, LoopbackServer) {
    let (opened_tx, opened_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            opened_tx,
            buffer: buffer.max(1),
            refusal: Arc::new(Mutex::new(None)),
        },
        LoopbackServer { opened_rx },
    )
}

/// Pair sized by `transport.loopback_buffer`
pub fn loopback_from_config(config: &TransportConfig) -> (LoopbackTransport, LoopbackServer) {
    loopback(config.loopback_buffer)
}

#[derive(Clone)]
pub struct LoopbackTransport {
    opened_tx: mpsc::UnboundedSender<LoopbackRun>,
    buffer: usize,
    refusal: Arc<Mutex<Option<String>>>,
}

impl LoopbackTransport {
    /// Make the next `open` fail with `reason`
    pub fn refuse_next(&self, reason: impl Into<String>) {
        *self.refusal.lock() = Some(reason.into());
    }
}

#[async_trait]
impl ComparisonTransport for LoopbackTransport {
    async fn open(&self, payload: &ComparisonPayload) -> Result<RunChannel> {
        let refusal = self.refusal.lock().take();
        if let Some(reason) = refusal {
            return Err(CompareError::transport("open", reason));
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let closed = Arc::new(AtomicBool::new(false));
        let run = LoopbackRun {
            payload: payload.clone(),
            tx,
            closed: closed.clone(),
        };
        self.opened_tx
            .send(run)
            .map_err(|_| CompareError::transport("open", "loopback server is gone"))?;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(RunChannel::new(stream).with_close_hook(move || {
            closed.store(true, Ordering::SeqCst);
        }))
    }
}

/// Server side of the loopback pair
pub struct LoopbackServer {
    opened_rx: mpsc::UnboundedReceiver<LoopbackRun>,
}

impl LoopbackServer {
    /// Wait for the next opened run
    pub async fn accept(&mut self) -> Option<LoopbackRun> {
        self.opened_rx.recv().await
    }
}

/// One opened run as seen by the endpoint
pub struct LoopbackRun {
    pub payload: ComparisonPayload,
    tx: mpsc::Sender<Result<StreamMessage>>,
    closed: Arc<AtomicBool>,
}

impl LoopbackRun {
    /// Push an incremental answer. Returns `false` if the client is gone.
    pub async fn answer(&self, question_index: usize, version_id: &str, answer: &str) -> bool {
        self.push(Ok(StreamMessage::answer(question_index, version_id, answer)))
            .await
    }

    /// Push the end marker
    pub async fn end(&self) -> bool {
        self.push(Ok(StreamMessage::End)).await
    }

    /// Report a transport failure to the client
    pub async fn fail(&self, message: &str) -> bool {
        self.push(Err(CompareError::transport("stream", message))).await
    }

    /// Push a raw wire frame, decoded exactly as a network transport would
    pub async fn send_frame(&self, frame: &str) -> bool {
        self.push(decode_frame(frame)).await
    }

    /// Whether the client closed its channel
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    /// Drop the connection without an end marker
    pub fn hang_up(self) {}

    async fn push(&self, item: Result<StreamMessage>) -> bool {
        if self.tx.send(item).await.is_err() {
            debug!("Loopback client closed; frame discarded");
            return false;
        }
        true
    }
}
