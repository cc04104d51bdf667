//! flowcompare - side-by-side comparison runs for flow versions
//!
//! A comparison view asks the same questions of several versions of a flow.
//! `ExecutionCoordinator` owns the question rows and version columns, starts at
//! most one run at a time, and routes each streamed answer to the cell sink
//! registered for it.

pub mod coord;
pub mod core;
pub mod logging;
pub mod matrix;
pub mod transport;

pub use coord::{
    BroadcastObserver, BufferingObserver, CellKey, CellSink, CoordinatorBuilder,
    ExecutionCoordinator, LoggingObserver, MissReason, RunContext, RunEvent, RunObserver,
    RunOutcome, RunReport, RunRequest, RunTarget, SinkRegistration, SinkRegistry,
};
pub use core::{CompareError, CoordinatorConfig, Result, TransportConfig};
pub use logging::init_logging;
pub use matrix::{
    Question, QuestionSet, RunScope, SharedRunState, VersionDetail, VersionSlot,
    VersionSlotManager, VersionSource,
};
pub use transport::{
    loopback, loopback_from_config, ComparisonPayload, ComparisonTransport, LoopbackRun, LoopbackServer,
    LoopbackTransport, RunChannel, SseTransport, StreamMessage,
};
