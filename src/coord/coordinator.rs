//! ExecutionCoordinator - the heart of a comparison view
//!
//! One coordinator is built when a comparison view opens and dropped when it
//! closes. It owns the question set, the version slots and the sink registry,
//! turns run requests into a single transport channel, and routes every
//! streamed answer back to the cell it belongs to.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coord::hooks::{BroadcastObserver, RunContext, RunObserver};
use crate::coord::sinks::{CellSink, SinkRegistration, SinkRegistry};
use crate::coord::types::{
    CellKey, MissReason, RunEvent, RunOutcome, RunReport, RunRequest, RunTarget,
};
use crate::core::config::CoordinatorConfig;
use crate::core::errors::{CompareError, Result};
use crate::matrix::questions::QuestionSet;
use crate::matrix::slots::{VersionSlotManager, VersionSource};
use crate::matrix::state::{ActiveRun, RunScope, SharedRunState};
use crate::transport::protocol::{AnswerFrame, StreamMessage};
use crate::transport::{ComparisonTransport, RunChannel};

/// Coordinator for comparison runs
pub struct ExecutionCoordinator {
    config: CoordinatorConfig,
    state: SharedRunState,
    questions: Arc<QuestionSet>,
    slots: Arc<VersionSlotManager>,
    sinks: SinkRegistry,
    transport: Arc<dyn ComparisonTransport>,
    observers: Vec<Arc<dyn RunObserver>>,
    events: Arc<BroadcastObserver>,
    target: RwLock<RunTarget>,
}

/// Returns the board to `RunScope::None` when a run ends, however it ends
struct ScopeGuard {
    state: SharedRunState,
    run_id: String,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut board = self.state.write();
        board.scope = RunScope::None;
        board.active = None;
        debug!(run_id = %self.run_id, "Run scope released");
    }
}

#[derive(Default)]
struct RunTally {
    routed: usize,
    misses: usize,
    delivered: HashSet<CellKey>,
}

impl ExecutionCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn questions(&self) -> &Arc<QuestionSet> {
        &self.questions
    }

    pub fn slots(&self) -> &Arc<VersionSlotManager> {
        &self.slots
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    pub fn run_state(&self) -> &SharedRunState {
        &self.state
    }

    pub fn scope(&self) -> RunScope {
        self.state.scope()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_version_ready(&self, version_id: &str) -> bool {
        self.state.is_version_ready(version_id)
    }

    /// Register the sink rendering `(question_index, version_id)`
    pub fn register_sink(
        &self,
        question_index: usize,
        version_id: impl Into<String>,
        sink: Arc<dyn CellSink>,
    ) -> SinkRegistration {
        self.sinks
            .register(CellKey::new(question_index, version_id), sink)
    }

    /// Receive every run event from now on
    pub fn subscribe(&self) -> async_broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn target(&self) -> RunTarget {
        self.target.read().clone()
    }

    pub fn set_node_id(&self, node_id: impl Into<String>) {
        self.target.write().node_id = node_id.into();
    }

    pub fn set_inputs(&self, inputs: Value) {
        self.target.write().inputs = inputs;
    }

    /// Run every question against every bound version
    pub async fn run_all(&self) -> Result<RunReport> {
        self.run(RunScope::All).await
    }

    /// Run one question against every bound version
    pub async fn run_row(&self, question_index: usize) -> Result<RunReport> {
        self.run(RunScope::Row(question_index)).await
    }

    /// Run every question against one version
    pub async fn run_column(&self, version_id: impl Into<String>) -> Result<RunReport> {
        self.run(RunScope::Column(version_id.into())).await
    }

    /// Start a run for `scope` and wait for its terminal outcome.
    ///
    /// Fails with `RunInProgress` while another run is in flight.
    pub async fn run(&self, scope: RunScope) -> Result<RunReport> {
        let (request, guard, cancel_rx) = self.prepare(scope)?;
        self.run_comparison(request, guard, cancel_rx).await
    }

    /// Cancel the run in flight. Returns `false` if there was none.
    pub fn cancel(&self) -> bool {
        let active = self.state.write().active.take();
        match active {
            Some(run) => {
                info!(run_id = %run.run_id, "Cancelling comparison run");
                let _ = run.cancel_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Claim the scope, update readiness and freeze the request.
    ///
    /// Everything happens under the board lock so two callers can never both
    /// see an idle coordinator.
    fn prepare(&self, scope: RunScope) -> Result<(RunRequest, ScopeGuard, oneshot::Receiver<()>)> {
        let target = self.target();
        if target.node_id.trim().is_empty() {
            return Err(CompareError::Validation {
                message: "no target node selected".to_string(),
                field: Some("node_id".to_string()),
            });
        }

        let mut board = self.state.write();
        if board.is_running() {
            return Err(CompareError::RunInProgress {
                active: board.scope.clone(),
            });
        }

        let (questions, version_ids) = match &scope {
            RunScope::None => {
                return Err(CompareError::validation("cannot start a run without a scope"));
            }
            RunScope::All => {
                let version_ids = self.slots.version_ids();
                if version_ids.is_empty() || self.questions.is_empty() {
                    return Err(CompareError::validation(
                        "run-all needs at least one question and one bound version",
                    ));
                }
                board.clear_versions();
                (self.questions.snapshot_all(true), version_ids)
            }
            RunScope::Row(question_index) => {
                let version_ids = self.slots.version_ids();
                if version_ids.is_empty() {
                    return Err(CompareError::validation("run-row needs at least one bound version"));
                }
                (vec![self.questions.snapshot_one(*question_index, true)?], version_ids)
            }
            RunScope::Column(version_id) => {
                if !self.slots.contains_version(version_id) {
                    return Err(CompareError::Validation {
                        message: format!("version {} is not bound to any slot", version_id),
                        field: Some("version_id".to_string()),
                    });
                }
                if self.questions.is_empty() {
                    return Err(CompareError::validation("run-column needs at least one question"));
                }
                board.mark_version(version_id, false);
                (self.questions.snapshot_all(false), vec![version_id.clone()])
            }
        };

        let run_id = Uuid::new_v4().to_string();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        board.scope = scope.clone();
        board.active = Some(ActiveRun {
            run_id: run_id.clone(),
            cancel_tx,
        });
        drop(board);

        let request = RunRequest {
            run_id: run_id.clone(),
            scope,
            question_indexes: questions.iter().map(|q| q.index).collect(),
            question_ids: questions.iter().map(|q| q.id.clone()).collect(),
            question_texts: questions.into_iter().map(|q| q.text).collect(),
            version_ids,
            node_id: target.node_id,
            inputs: target.inputs,
        };
        let guard = ScopeGuard {
            state: self.state.clone(),
            run_id,
        };
        Ok((request, guard, cancel_rx))
    }

    /// Drive one prepared request to its terminal outcome
    async fn run_comparison(
        &self,
        request: RunRequest,
        _guard: ScopeGuard,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> Result<RunReport> {
        let ctx = RunContext::new(request.run_id.clone(), request.scope.clone());
        let started_at = Utc::now();
        let mut tally = RunTally::default();

        info!(
            run_id = %request.run_id,
            scope = %request.scope,
            questions = request.question_indexes.len(),
            versions = request.version_ids.len(),
            "Starting comparison run"
        );

        for cell in request.cells() {
            if let Some(sink) = self.sinks.get(&cell) {
                sink.loading();
            }
        }
        self.emit(
            &ctx,
            RunEvent::RunStarted {
                run_id: request.run_id.clone(),
                scope: request.scope.clone(),
                cells: request.cell_count(),
            },
        )
        .await;

        let payload = request.payload();
        let opened = tokio::select! {
            biased;
            _ = &mut cancel_rx => Err(CompareError::cancelled("open comparison stream")),
            result = self.transport.open(&payload) => result,
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => return self.fail_run(&ctx, &request, e, &tally).await,
        };

        let result = self
            .dispatch(&ctx, &request, &mut channel, &mut cancel_rx, &mut tally)
            .await;
        channel.close();

        match result {
            Ok(()) => {
                // Past the end marker there is nothing left to cancel.
                self.state.write().active = None;
                Ok(self.complete_run(&ctx, &request, started_at, tally).await)
            }
            Err(e) => self.fail_run(&ctx, &request, e, &tally).await,
        }
    }

    /// Consume the channel until the end marker, an error or cancellation
    async fn dispatch(
        &self,
        ctx: &RunContext,
        request: &RunRequest,
        channel: &mut RunChannel,
        cancel_rx: &mut oneshot::Receiver<()>,
        tally: &mut RunTally,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = &mut *cancel_rx => {
                    return Err(CompareError::Cancelled {
                        operation: "comparison run".to_string(),
                        reason: Some("closed by caller".to_string()),
                    });
                }
                next = channel.next() => match next {
                    Some(Ok(StreamMessage::Answer(frame))) => {
                        self.route(ctx, request, frame, tally).await;
                    }
                    Some(Ok(StreamMessage::End)) => return Ok(()),
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(CompareError::transport(
                            "stream",
                            "stream closed before the end marker",
                        ));
                    }
                }
            }
        }
    }

    /// Deliver one answer to its sink, or drop it
    async fn route(&self, ctx: &RunContext, request: &RunRequest, frame: AnswerFrame, tally: &mut RunTally) {
        let miss = match request.resolve_question(frame.question_index) {
            None => Some(MissReason::QuestionOutOfRange),
            Some(_) if !request.includes_version(&frame.version_id) => Some(MissReason::VersionNotInRun),
            Some(_) if !self.slots.contains_version(&frame.version_id) => Some(MissReason::VersionRemoved),
            Some(question_index) => {
                let cell = CellKey::new(question_index, frame.version_id.clone());
                tally.delivered.insert(cell.clone());
                match self.sinks.get(&cell) {
                    Some(sink) => {
                        sink.set_data(&frame.answer);
                        tally.routed += 1;
                        self.emit(
                            ctx,
                            RunEvent::CellRouted {
                                run_id: request.run_id.clone(),
                                cell,
                            },
                        )
                        .await;
                        None
                    }
                    None => Some(MissReason::NoSink),
                }
            }
        };

        if let Some(reason) = miss {
            tally.misses += 1;
            debug!(
                run_id = %request.run_id,
                question_index = frame.question_index,
                version_id = %frame.version_id,
                ?reason,
                "Dropping stream message"
            );
            self.emit(
                ctx,
                RunEvent::RoutingMiss {
                    run_id: request.run_id.clone(),
                    local_question_index: frame.question_index,
                    version_id: frame.version_id,
                    reason,
                },
            )
            .await;
        }
    }

    async fn complete_run(
        &self,
        ctx: &RunContext,
        request: &RunRequest,
        started_at: DateTime<Utc>,
        tally: RunTally,
    ) -> RunReport {
        let mut cells_without_result = Vec::new();
        for cell in request.cells() {
            if tally.delivered.contains(&cell) {
                continue;
            }
            if let Some(sink) = self.sinks.get(&cell) {
                sink.no_result();
            }
            cells_without_result.push(cell);
        }

        self.questions.mark_ready(&request.question_ids);
        if matches!(request.scope, RunScope::All | RunScope::Column(_)) {
            let mut board = self.state.write();
            for version_id in &request.version_ids {
                // A version unbound mid-run has nothing left to be ready for.
                if self.slots.contains_version(version_id) {
                    board.mark_version(version_id, true);
                }
            }
        }

        info!(
            run_id = %request.run_id,
            messages_routed = tally.routed,
            routing_misses = tally.misses,
            without_result = cells_without_result.len(),
            "Comparison run completed"
        );
        self.emit(
            ctx,
            RunEvent::RunFinished {
                run_id: request.run_id.clone(),
                scope: request.scope.clone(),
                outcome: RunOutcome::Completed,
                messages_routed: tally.routed,
                routing_misses: tally.misses,
            },
        )
        .await;

        RunReport {
            run_id: request.run_id.clone(),
            scope: request.scope.clone(),
            started_at,
            finished_at: Utc::now(),
            cells: request.cell_count(),
            messages_routed: tally.routed,
            routing_misses: tally.misses,
            cells_without_result,
        }
    }

    /// Reset touched cells and report the failure. Always returns `Err(err)`.
    async fn fail_run(
        &self,
        ctx: &RunContext,
        request: &RunRequest,
        err: CompareError,
        tally: &RunTally,
    ) -> Result<RunReport> {
        let cancelled = matches!(err, CompareError::Cancelled { .. });
        if !cancelled || self.config.reset_on_cancel {
            self.reset_cells(request);
        }

        let outcome = if cancelled {
            info!(run_id = %request.run_id, "Comparison run cancelled");
            RunOutcome::Cancelled
        } else {
            warn!(run_id = %request.run_id, category = err.category(), "Comparison run failed: {}", err);
            RunOutcome::Failed {
                reason: err.to_string(),
            }
        };
        self.emit(
            ctx,
            RunEvent::RunFinished {
                run_id: request.run_id.clone(),
                scope: request.scope.clone(),
                outcome,
                messages_routed: tally.routed,
                routing_misses: tally.misses,
            },
        )
        .await;
        Err(err)
    }

    /// Tell every registered sink in the request to go back to idle
    fn reset_cells(&self, request: &RunRequest) {
        for cell in request.cells() {
            if let Some(sink) = self.sinks.get(&cell) {
                sink.loaded();
            }
        }
    }

    async fn emit(&self, ctx: &RunContext, event: RunEvent) {
        for observer in &self.observers {
            observer.handle(ctx, &event).await;
        }
    }
}

/// Builder for `ExecutionCoordinator`
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    transport: Option<Arc<dyn ComparisonTransport>>,
    versions: Option<Arc<dyn VersionSource>>,
    observers: Vec<Arc<dyn RunObserver>>,
    target: RunTarget,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            transport: None,
            versions: None,
            observers: Vec::new(),
            target: RunTarget {
                node_id: String::new(),
                inputs: Value::Object(serde_json::Map::new()),
            },
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ComparisonTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_version_source(mut self, source: Arc<dyn VersionSource>) -> Self {
        self.versions = Some(source);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Flow node whose output is compared
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.target.node_id = node_id.into();
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.target.inputs = inputs;
        self
    }

    pub fn build(self) -> Result<ExecutionCoordinator> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| CompareError::configuration("a comparison transport is required"))?;
        let versions = self
            .versions
            .ok_or_else(|| CompareError::configuration("a version source is required"))?;

        let state = SharedRunState::new();
        let questions = Arc::new(QuestionSet::new(self.config.max_questions, state.clone()));
        let slots = Arc::new(VersionSlotManager::new(
            self.config.initial_slots,
            versions,
            state.clone(),
        ));
        let events = Arc::new(BroadcastObserver::new(self.config.event_capacity));
        let mut observers = self.observers;
        observers.push(events.clone());

        Ok(ExecutionCoordinator {
            config: self.config,
            state,
            questions,
            slots,
            sinks: SinkRegistry::new(),
            transport,
            observers,
            events,
            target: RwLock::new(self.target),
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
