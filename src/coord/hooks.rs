//! Observer hooks for comparison runs
//!
//! Observers see every run event. They cannot change routing.

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::coord::types::{RunEvent, RunOutcome};
use crate::matrix::state::RunScope;

/// Context provided to observers for each event
#[derive(Clone, Debug)]
pub struct RunContext {
    pub run_id: String,
    pub scope: RunScope,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, scope: RunScope) -> Self {
        Self {
            run_id: run_id.into(),
            scope,
        }
    }
}

#[async_trait]
pub trait RunObserver: Send + Sync {
    /// Handle a run event
    async fn handle(&self, ctx: &RunContext, event: &RunEvent);
}

/// Logs every event through `tracing`
pub struct LoggingObserver;

#[async_trait]
impl RunObserver for LoggingObserver {
    async fn handle(&self, ctx: &RunContext, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { cells, .. } => {
                tracing::info!(run_id = %ctx.run_id, scope = %ctx.scope, cells, "Run started");
            }
            RunEvent::CellRouted { cell, .. } => {
                tracing::trace!(run_id = %ctx.run_id, cell = %cell, "Cell updated");
            }
            RunEvent::RoutingMiss {
                local_question_index,
                version_id,
                reason,
                ..
            } => {
                tracing::debug!(
                    run_id = %ctx.run_id,
                    question_index = local_question_index,
                    version_id = %version_id,
                    ?reason,
                    "Message dropped"
                );
            }
            RunEvent::RunFinished {
                outcome,
                messages_routed,
                routing_misses,
                ..
            } => match outcome {
                RunOutcome::Completed => tracing::info!(
                    run_id = %ctx.run_id,
                    messages_routed,
                    routing_misses,
                    "Run completed"
                ),
                RunOutcome::Failed { reason } => {
                    tracing::warn!(run_id = %ctx.run_id, "Run failed: {}", reason)
                }
                RunOutcome::Cancelled => tracing::info!(run_id = %ctx.run_id, "Run cancelled"),
            },
        }
    }
}

/// Collects events in memory
#[derive(Clone, Default)]
pub struct BufferingObserver {
    events: Arc<RwLock<Vec<RunEvent>>>,
}

impl BufferingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl RunObserver for BufferingObserver {
    async fn handle(&self, _ctx: &RunContext, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}

/// Fans events out to any number of subscribers.
///
/// Slow subscribers lose the oldest events rather than stalling a run.
pub struct BroadcastObserver {
    tx: Sender<RunEvent>,
    // Keeps the channel open while nobody is subscribed.
    idle: InactiveReceiver<RunEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (mut tx, rx) = async_broadcast::broadcast(capacity.max(1));
        tx.set_overflow(true);
        tx.set_await_active(false);
        Self {
            tx,
            idle: rx.deactivate(),
        }
    }

    pub fn subscribe(&self) -> Receiver<RunEvent> {
        self.idle.activate_cloned()
    }
}

#[async_trait]
impl RunObserver for BroadcastObserver {
    async fn handle(&self, _ctx: &RunContext, event: &RunEvent) {
        // Fails only when nobody is listening.
        let _ = self.tx.try_broadcast(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> RunEvent {
        RunEvent::RunStarted {
            run_id: "r1".into(),
            scope: RunScope::All,
            cells: 4,
        }
    }

    #[tokio::test]
    async fn test_buffering_observer_collects() {
        let observer = BufferingObserver::new();
        let ctx = RunContext::new("r1", RunScope::All);
        observer.handle(&ctx, &started()).await;
        assert_eq!(observer.events(), vec![started()]);
        observer.clear();
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_harmless() {
        let observer = BroadcastObserver::new(2);
        let ctx = RunContext::new("r1", RunScope::All);
        observer.handle(&ctx, &started()).await;

        let mut rx = observer.subscribe();
        observer.handle(&ctx, &started()).await;
        assert_eq!(rx.recv().await.unwrap(), started());
    }

    #[tokio::test]
    async fn test_broadcast_overflow_keeps_newest() {
        let observer = BroadcastObserver::new(1);
        let ctx = RunContext::new("r1", RunScope::All);
        let mut rx = observer.subscribe();
        observer.handle(&ctx, &started()).await;
        let finished = RunEvent::RunFinished {
            run_id: "r1".into(),
            scope: RunScope::All,
            outcome: RunOutcome::Cancelled,
            messages_routed: 0,
            routing_misses: 0,
        };
        observer.handle(&ctx, &finished).await;

        let received = loop {
            match rx.recv().await {
                Ok(event) => break event,
                Err(async_broadcast::RecvError::Overflowed(_)) => continue,
                Err(e) => panic!("unexpected receive error: {}", e),
            }
        };
        assert_eq!(received, finished);
    }
}
