//! The comparison matrix: question rows, version columns and the run board
//! both of them consult.

pub mod questions;
pub mod slots;
pub mod state;

pub use questions::{Question, QuestionSet};
pub use slots::{VersionDetail, VersionSlot, VersionSlotManager, VersionSource};
pub use state::{RunBoard, RunScope, SharedRunState};
