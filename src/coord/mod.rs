//! Run coordination
//!
//! The coordinator turns a run scope into one transport channel and routes the
//! streamed answers to the registered cell sinks.

pub mod coordinator;
pub mod hooks;
pub mod sinks;
pub mod types;

pub use coordinator::*;
pub use hooks::*;
pub use sinks::*;
pub use types::*;
