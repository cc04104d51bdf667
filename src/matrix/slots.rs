//! Version slots: the columns of the comparison matrix
//!
//! A slot is created empty and bound to a version once that version's detail
//! has been fetched. Fetches run without holding any lock; the result is applied
//! to the slot that requested it, wherever that slot sits by then.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::errors::{CompareError, Result};
use crate::matrix::state::SharedRunState;

/// Snapshot of one stored flow version
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionDetail {
    pub version_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Serialized graph of this version
    #[serde(default)]
    pub graph: Value,
}

impl VersionDetail {
    pub fn new(version_id: impl Into<String>) -> Self {
        Self {
            version_id: version_id.into(),
            name: None,
            description: None,
            created_at: None,
            graph: Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Where version details come from
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn get_version_detail(&self, version_id: &str) -> anyhow::Result<VersionDetail>;
}

/// Public view of a slot
#[derive(Clone, Debug, PartialEq)]
pub struct VersionSlot {
    pub index: usize,
    pub version_id: Option<String>,
    pub detail: Option<VersionDetail>,
}

impl VersionSlot {
    pub fn is_empty(&self) -> bool {
        self.version_id.is_none()
    }
}

#[derive(Debug)]
struct SlotEntry {
    key: Uuid,
    /// Bumped on every assignment; only the latest fetch may land
    generation: u64,
    version_id: Option<String>,
    detail: Option<VersionDetail>,
}

impl SlotEntry {
    fn empty() -> Self {
        Self {
            key: Uuid::new_v4(),
            generation: 0,
            version_id: None,
            detail: None,
        }
    }

    fn view(&self, index: usize) -> VersionSlot {
        VersionSlot {
            index,
            version_id: self.version_id.clone(),
            detail: self.detail.clone(),
        }
    }
}

pub struct VersionSlotManager {
    slots: RwLock<Vec<SlotEntry>>,
    source: Arc<dyn VersionSource>,
    state: SharedRunState,
}

impl VersionSlotManager {
    pub fn new(initial_slots: usize, source: Arc<dyn VersionSource>, state: SharedRunState) -> Self {
        let slots = (0..initial_slots).map(|_| SlotEntry::empty()).collect();
        Self {
            slots: RwLock::new(slots),
            source,
            state,
        }
    }

    /// Append an empty slot; returns its index
    pub fn add_empty_slot(&self) -> usize {
        let mut slots = self.slots.write();
        slots.push(SlotEntry::empty());
        slots.len() - 1
    }

    /// Fetch `version_id` and bind it to the slot at `index`.
    ///
    /// The slot is only touched once the fetch resolves. On failure it keeps
    /// its previous contents and the caller may simply try again.
    pub async fn assign_version(&self, index: usize, version_id: impl Into<String>) -> Result<VersionSlot> {
        let version_id = version_id.into();
        if version_id.trim().is_empty() {
            return Err(CompareError::Validation {
                message: "version id cannot be empty".to_string(),
                field: Some("version_id".to_string()),
            });
        }

        let (key, generation) = {
            let mut slots = self.slots.write();
            let len = slots.len();
            let entry = slots
                .get_mut(index)
                .ok_or_else(|| CompareError::invalid_index("version slots", index, len))?;
            entry.generation += 1;
            (entry.key, entry.generation)
        };

        let detail = match self.source.get_version_detail(&version_id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(version_id = %version_id, slot = index, "Version fetch failed: {}", e);
                return Err(CompareError::version_fetch(version_id, e));
            }
        };

        // Same order as run start: board first, then slots.
        let mut board = self.state.write();
        let mut slots = self.slots.write();
        let position = slots.iter().position(|s| s.key == key).ok_or_else(|| {
            CompareError::validation(format!(
                "slot was removed while version {} was loading",
                version_id
            ))
        })?;

        let entry = &mut slots[position];
        if entry.generation != generation {
            debug!(version_id = %version_id, "Discarding superseded version fetch");
            return Err(CompareError::Cancelled {
                operation: "assign_version".to_string(),
                reason: Some("superseded by a newer assignment".to_string()),
            });
        }

        entry.version_id = Some(version_id.clone());
        entry.detail = Some(detail);

        if board.is_running() {
            board.mark_version(&version_id, false);
        }

        info!(version_id = %version_id, slot = position, "Version bound to slot");
        Ok(entry.view(position))
    }

    /// Remove the slot at `index` immediately. In-flight runs are not touched.
    pub fn remove_slot(&self, index: usize) -> Result<VersionSlot> {
        let mut slots = self.slots.write();
        if index >= slots.len() {
            return Err(CompareError::invalid_index("version slots", index, slots.len()));
        }
        let removed = slots.remove(index);
        debug!(slot = index, version_id = ?removed.version_id, "Removed version slot");
        Ok(removed.view(index))
    }

    pub fn slots(&self) -> Vec<VersionSlot> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .map(|(index, entry)| entry.view(index))
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<VersionSlot> {
        self.slots.read().get(index).map(|entry| entry.view(index))
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Bound version ids in slot order, without duplicates
    pub fn version_ids(&self) -> Vec<String> {
        let slots = self.slots.read();
        let mut seen = HashSet::new();
        slots
            .iter()
            .filter_map(|entry| entry.version_id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Whether some slot is currently bound to `version_id`
    pub fn contains_version(&self, version_id: &str) -> bool {
        self.slots
            .read()
            .iter()
            .any(|entry| entry.version_id.as_deref() == Some(version_id))
    }
}
