//! Shared run bookkeeping
//!
//! The coordinator, the question set and the slot manager all consult the same
//! board: which scope is active and which versions are current.

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Subset of the comparison matrix targeted by a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum RunScope {
    #[default]
    None,
    All,
    /// One question row, by global question position
    Row(usize),
    /// One version column, by version id
    Column(String),
}

impl RunScope {
    pub fn is_active(&self) -> bool {
        !matches!(self, RunScope::None)
    }
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunScope::None => write!(f, "none"),
            RunScope::All => write!(f, "all"),
            RunScope::Row(q) => write!(f, "row {}", q),
            RunScope::Column(v) => write!(f, "column {}", v),
        }
    }
}

/// Handle on the run currently in flight
#[derive(Debug)]
pub(crate) struct ActiveRun {
    pub run_id: String,
    pub cancel_tx: oneshot::Sender<()>,
}

/// Mutable run bookkeeping
#[derive(Debug, Default)]
pub struct RunBoard {
    pub(crate) scope: RunScope,
    pub(crate) version_ready: HashMap<String, bool>,
    pub(crate) active: Option<ActiveRun>,
}

impl RunBoard {
    pub fn scope(&self) -> &RunScope {
        &self.scope
    }

    pub fn is_running(&self) -> bool {
        self.scope.is_active()
    }

    pub fn is_version_ready(&self, version_id: &str) -> bool {
        self.version_ready.get(version_id).copied().unwrap_or(false)
    }

    /// Id of the run in flight, if any
    pub fn active_run_id(&self) -> Option<&str> {
        self.active.as_ref().map(|run| run.run_id.as_str())
    }

    pub(crate) fn mark_version(&mut self, version_id: &str, ready: bool) {
        self.version_ready.insert(version_id.to_string(), ready);
    }

    pub(crate) fn clear_versions(&mut self) {
        self.version_ready.clear();
    }
}

/// Handle to the board shared by one comparison view
#[derive(Clone, Default)]
pub struct SharedRunState {
    inner: Arc<RwLock<RunBoard>>,
}

impl SharedRunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current scope (cloned)
    pub fn scope(&self) -> RunScope {
        self.inner.read().scope.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.read().is_running()
    }

    pub fn is_version_ready(&self, version_id: &str) -> bool {
        self.inner.read().is_version_ready(version_id)
    }

    /// Snapshot of the per-version readiness map
    pub fn version_readiness(&self) -> HashMap<String, bool> {
        self.inner.read().version_ready.clone()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RunBoard> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display_and_activity() {
        assert!(!RunScope::None.is_active());
        assert!(RunScope::Row(3).is_active());
        assert_eq!(RunScope::Column("v1".into()).to_string(), "column v1");
        assert_eq!(RunScope::default(), RunScope::None);
    }

    #[test]
    fn test_version_readiness_defaults_to_not_ready() {
        let state = SharedRunState::new();
        assert!(!state.is_version_ready("missing"));
        state.write().mark_version("v1", true);
        assert!(state.is_version_ready("v1"));
        state.write().clear_versions();
        assert!(!state.is_version_ready("v1"));
    }
}
