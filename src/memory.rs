//! In-memory reference implementation of the `spec.md` §6 external
//! collaborators, used by this crate's own tests and `tests/scenarios.rs`.
//! Grounded in the same shape as `spacetimedb-core`'s lightweight test
//! doubles (e.g. `host::test_utils`): a `parking_lot::RwLock`-guarded
//! `HashMap`, no persistence, no networking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::binding_record::BindingRecord;
use crate::ids::{LogTs, LsId, TabletId, TabletMapKey};
use crate::store::{GetTabletError, LogStream, LogStreamService, MemtableRefOp, MetaMemoryManager, Tablet, TabletStore};
use crate::tx_slot::TxSlot;

struct InMemoryTabletInner {
    tx_slot: TxSlot,
    binding: BindingRecord,
    /// Tracks which commit log ts `back_fill_log_ts_for_commit` has already
    /// applied its decrement for, giving the idempotence
    /// `spec.md` §4.5 requires.
    backfilled_for_commit: Option<LogTs>,
}

/// An in-memory tablet: a `TxSlot` + `BindingRecord` pair behind one lock,
/// exactly the granularity `spec.md` §5 describes.
pub struct InMemoryTablet {
    id: TabletId,
    inner: RwLock<InMemoryTabletInner>,
}

impl InMemoryTablet {
    fn new(id: TabletId) -> Self {
        Self {
            id,
            inner: RwLock::new(InMemoryTabletInner {
                tx_slot: TxSlot::default(),
                binding: BindingRecord::new(id),
                backfilled_for_commit: None,
            }),
        }
    }
}

impl Tablet for InMemoryTablet {
    fn tablet_id(&self) -> TabletId {
        self.id
    }

    fn get_tx_data(&self) -> TxSlot {
        self.inner.read().tx_slot
    }

    fn set_tx_data(
        &self,
        slot: TxSlot,
        _memtable_log_ts: LogTs,
        _for_replay: bool,
        _ref_op: MemtableRefOp,
        _is_callback: bool,
    ) {
        self.inner.write().tx_slot = slot;
    }

    fn get_ddl_data(&self) -> BindingRecord {
        self.inner.read().binding.clone()
    }

    fn set_multi_data_for_commit(&self, record: BindingRecord, _log_ts: LogTs, _for_replay: bool, _ref_op: MemtableRefOp) {
        self.inner.write().binding = record;
    }

    fn set_tablet_final_status(&self, slot: TxSlot, _memtable_log_ts: LogTs, _for_replay: bool, _ref_op: MemtableRefOp) {
        self.inner.write().tx_slot = slot;
    }

    fn back_fill_log_ts_for_commit(&self, _record: &BindingRecord) -> bool {
        let mut inner = self.inner.write();
        let commit_ts = inner.tx_slot.tx_log_ts;
        if inner.backfilled_for_commit == Some(commit_ts) {
            false
        } else {
            inner.tx_slot.dec_unsynced();
            inner.backfilled_for_commit = Some(commit_ts);
            true
        }
    }
}

/// Reference `TabletStore`: a flat map from `(ls, tablet)` to tablet.
/// Tablets must be created explicitly with [`InMemoryTabletStore::create_tablet`]
/// before they can be locked — there is no implicit creation-on-lookup, just
/// as the real store only ever hands back tablets that genuinely exist.
#[derive(Default)]
pub struct InMemoryTabletStore {
    tablets: RwLock<HashMap<TabletMapKey, Arc<InMemoryTablet>>>,
}

impl InMemoryTabletStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_tablet(&self, key: TabletMapKey) -> Arc<InMemoryTablet> {
        let tablet = Arc::new(InMemoryTablet::new(key.tablet_id));
        self.tablets.write().insert(key, tablet.clone());
        tablet
    }

    pub fn remove_tablet(&self, key: TabletMapKey) {
        self.tablets.write().remove(&key);
    }

    pub fn binding_of(&self, key: TabletMapKey) -> Option<BindingRecord> {
        self.tablets.read().get(&key).map(|t| t.get_ddl_data())
    }

    pub fn tx_slot_of(&self, key: TabletMapKey) -> Option<TxSlot> {
        self.tablets.read().get(&key).map(|t| t.get_tx_data())
    }
}

impl TabletStore for InMemoryTabletStore {
    fn get_tablet(&self, key: TabletMapKey) -> Result<Arc<dyn Tablet>, GetTabletError> {
        self.tablets
            .read()
            .get(&key)
            .map(|t| t.clone() as Arc<dyn Tablet>)
            .ok_or(GetTabletError::NotExist)
    }
}

/// Reference `MetaMemoryManager`: membership-based pin set. Inserting a
/// key already pinned, or erasing one not pinned, is a no-op — the same
/// idempotence the source's `insert_pinned_tablet`/`erase_pinned_tablet`
/// exhibit for a reentrant `lock`.
#[derive(Default)]
pub struct InMemoryMetaMemoryManager {
    pinned: RwLock<HashSet<TabletMapKey>>,
}

impl InMemoryMetaMemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pinned(&self, key: TabletMapKey) -> bool {
        self.pinned.read().contains(&key)
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.read().len()
    }
}

impl MetaMemoryManager for InMemoryMetaMemoryManager {
    fn insert_pinned_tablet(&self, key: TabletMapKey) {
        self.pinned.write().insert(key);
    }

    fn erase_pinned_tablet(&self, key: TabletMapKey) {
        self.pinned.write().remove(&key);
    }
}

/// Reference `LogStream`.
pub struct InMemoryLogStream {
    id: LsId,
    checkpoint_ts: RwLock<LogTs>,
}

impl InMemoryLogStream {
    pub fn new(id: LsId, checkpoint_ts: LogTs) -> Self {
        Self {
            id,
            checkpoint_ts: RwLock::new(checkpoint_ts),
        }
    }

    pub fn set_checkpoint_ts(&self, ts: LogTs) {
        *self.checkpoint_ts.write() = ts;
    }
}

impl LogStream for InMemoryLogStream {
    fn id(&self) -> LsId {
        self.id
    }

    fn get_tablet_change_checkpoint_ts(&self) -> LogTs {
        *self.checkpoint_ts.read()
    }
}

/// Reference `LogStreamService`: a flat registry of pre-created log
/// streams.
#[derive(Default)]
pub struct InMemoryLogStreamService {
    streams: RwLock<HashMap<LsId, Arc<InMemoryLogStream>>>,
}

impl InMemoryLogStreamService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ls: Arc<InMemoryLogStream>) {
        self.streams.write().insert(ls.id(), ls);
    }
}

impl LogStreamService for InMemoryLogStreamService {
    fn get_ls(&self, ls_id: LsId) -> Result<Arc<dyn LogStream>, GetTabletError> {
        self.streams
            .read()
            .get(&ls_id)
            .map(|ls| ls.clone() as Arc<dyn LogStream>)
            .ok_or(GetTabletError::NotExist)
    }
}
