//! [`BindingRecord`]: the per-tablet value associating a data tablet with
//! its auxiliary and hidden companions. See `spec.md` §3.1, §3.2 invariants
//! 1 and 7.

use serde::{Deserialize, Serialize};

use crate::ids::{TabletId, Version};

/// Per-tablet binding metadata. Default-constructed in the invalid state
/// (`snapshot_version == Version::MAX`); mutated only from the commit phase
/// of a DDL transaction holding the tablet's [`crate::tx_slot::TxSlot`].
///
/// Field order is part of the wire contract (`spec.md` §6) and must not be
/// reordered: `bcs` encodes struct fields in declaration order, so this
/// order is the actual disk/wire layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub redefined: bool,
    pub snapshot_version: Version,
    pub schema_version: Version,
    pub data_tablet_id: TabletId,
    pub hidden_tablet_ids: Vec<TabletId>,
    pub lob_meta_tablet_id: Option<TabletId>,
    pub lob_piece_tablet_id: Option<TabletId>,
}

impl BindingRecord {
    /// A fresh, invalid record bound to `data_tablet_id`.
    pub fn new(data_tablet_id: TabletId) -> Self {
        Self {
            redefined: false,
            snapshot_version: Version::MAX,
            schema_version: Version::MAX,
            data_tablet_id,
            hidden_tablet_ids: Vec::new(),
            lob_meta_tablet_id: None,
            lob_piece_tablet_id: None,
        }
    }

    /// Invariant 1: valid iff both versions are set.
    pub fn is_valid(&self) -> bool {
        !self.snapshot_version.is_unset() && !self.schema_version.is_unset()
    }

    /// Appends `tablet_id` to `hidden_tablet_ids` unless it is the data
    /// tablet's own id (invariant 7) or already present (no duplicates,
    /// per `spec.md` §3.1). Insertion order is preserved.
    pub fn add_hidden_tablet(&mut self, tablet_id: TabletId) {
        if tablet_id != self.data_tablet_id && !self.hidden_tablet_ids.contains(&tablet_id) {
            self.hidden_tablet_ids.push(tablet_id);
        }
    }

    /// Sets the LOB meta tablet id unless it is the data tablet's own id
    /// (invariant 7).
    pub fn set_lob_meta_tablet(&mut self, tablet_id: TabletId) {
        if tablet_id != self.data_tablet_id {
            self.lob_meta_tablet_id = Some(tablet_id);
        }
    }

    /// Sets the LOB piece tablet id unless it is the data tablet's own id
    /// (invariant 7).
    pub fn set_lob_piece_tablet(&mut self, tablet_id: TabletId) {
        if tablet_id != self.data_tablet_id {
            self.lob_piece_tablet_id = Some(tablet_id);
        }
    }

    /// Clears `hidden_tablet_ids`, used by the unbind commit-modify phase
    /// (`spec.md` §4.4).
    pub fn clear_hidden_tablets(&mut self) {
        self.hidden_tablet_ids.clear();
    }
}
