//! Core types for coordinated comparison runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::matrix::state::RunScope;
use crate::transport::protocol::ComparisonPayload;

/// Address of one cell in the comparison matrix
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    /// Global question position
    pub question_index: usize,
    pub version_id: String,
}

impl CellKey {
    pub fn new(question_index: usize, version_id: impl Into<String>) -> Self {
        Self {
            question_index,
            version_id: version_id.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.question_index, self.version_id)
    }
}

/// Frozen description of one run.
///
/// Later edits to the question set or the slots never reach an in-flight
/// request; every cell it touches is in `question_indexes × version_ids`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: String,
    pub scope: RunScope,
    pub question_indexes: Vec<usize>,
    pub question_ids: Vec<String>,
    pub question_texts: Vec<String>,
    pub version_ids: Vec<String>,
    pub node_id: String,
    pub inputs: Value,
}

impl RunRequest {
    /// Every (question, version) pair in request order
    pub fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.question_indexes.iter().flat_map(move |&q| {
            self.version_ids
                .iter()
                .map(move |v| CellKey::new(q, v.clone()))
        })
    }

    pub fn cell_count(&self) -> usize {
        self.question_indexes.len() * self.version_ids.len()
    }

    /// Map a request-local question position back to the global one
    pub fn resolve_question(&self, local_index: usize) -> Option<usize> {
        self.question_indexes.get(local_index).copied()
    }

    pub fn includes_version(&self, version_id: &str) -> bool {
        self.version_ids.iter().any(|v| v == version_id)
    }

    /// Body sent to the comparison endpoint
    pub fn payload(&self) -> ComparisonPayload {
        ComparisonPayload {
            question_list: self.question_texts.clone(),
            version_list: self.version_ids.clone(),
            inputs: self.inputs.clone(),
            node_id: self.node_id.clone(),
        }
    }
}

/// Flow node and inputs the comparison runs against
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTarget {
    pub node_id: String,
    pub inputs: Value,
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed { reason: String },
    Cancelled,
}

/// Why a stream message did not reach a sink
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// `question_index` is outside the request's question list
    QuestionOutOfRange,
    /// The version was not part of this request
    VersionNotInRun,
    /// The version's slot was removed after the run started
    VersionRemoved,
    /// No sink is registered for the cell
    NoSink,
}

/// Events emitted during a run
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        scope: RunScope,
        cells: usize,
    },
    CellRouted {
        run_id: String,
        cell: CellKey,
    },
    RoutingMiss {
        run_id: String,
        local_question_index: usize,
        version_id: String,
        reason: MissReason,
    },
    RunFinished {
        run_id: String,
        scope: RunScope,
        outcome: RunOutcome,
        messages_routed: usize,
        routing_misses: usize,
    },
}

/// Summary of a successfully completed run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub scope: RunScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cells: usize,
    pub messages_routed: usize,
    pub routing_misses: usize,
    /// Cells that saw no data before the end marker
    pub cells_without_result: Vec<CellKey>,
}
