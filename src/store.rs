//! External collaborators the coordinator consumes (`spec.md` §6). These
//! are trait boundaries, not implementations — the surrounding engine
//! (tablet storage, meta-memory manager, log stream service) supplies the
//! concrete types. An in-memory reference implementation lives in
//! [`crate::memory`] behind the `testing` feature.

use std::sync::Arc;

use crate::binding_record::BindingRecord;
use crate::ids::{LogTs, LsId, TabletId, TabletMapKey, TxId, Version};
use crate::tx_slot::TxSlot;

/// Outcome of unlocking/committing a transaction against a tablet, from
/// `spec.md` §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyType {
    OnCommit,
    OnAbort,
}

/// Memtable reference-count adjustment attached to a persisted `TxSlot`
/// mutation, balancing the `INC_REF` taken at lock time against the
/// `DEC_REF` released at redo or unlock time (`spec.md` §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemtableRefOp {
    None,
    IncRef,
    DecRef,
}

/// Flags threaded through every 2PC-phase call, corresponding to the
/// source's `ObMulSourceDataNotifyArg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransFlags {
    pub tx_id: TxId,
    pub log_ts: LogTs,
    pub for_replay: bool,
    pub notify_type: NotifyType,
    /// Commit version of the surrounding DDL transaction; used when
    /// mutating a `BindingRecord`'s `snapshot_version` during the
    /// commit-modify phase. Meaningless for lock/set_log_ts calls.
    pub commit_version: Version,
    /// Whether the transaction's redo has already been durably synced.
    /// Only consulted on an abort that did not go through `set_log_ts`
    /// (`spec.md` §4.3 step 4).
    pub is_redo_synced: bool,
}

impl TransFlags {
    /// Convenience constructor for the common forward-path commit/lock
    /// case: not a replay, redo synced.
    pub fn new(tx_id: TxId, log_ts: LogTs, notify_type: NotifyType) -> Self {
        Self {
            tx_id,
            log_ts,
            for_replay: false,
            notify_type,
            commit_version: Version::MAX,
            is_redo_synced: true,
        }
    }

    /// Returns a copy of these flags with `notify_type` switched to
    /// `OnAbort`, used to build the rollback sweep's flags from the
    /// original forward-path flags (`spec.md` §7 propagation policy).
    pub fn as_abort(&self) -> Self {
        Self {
            notify_type: NotifyType::OnAbort,
            ..*self
        }
    }
}

/// Why [`TabletStore::get_tablet`] failed to hand back a tablet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetTabletError {
    /// Tablet does not exist at all, or (for `Tablet` read) is marked
    /// deleted.
    NotExist,
    /// Transient: a replay applier should retry because the tablet might
    /// still show up.
    Retry,
}

/// A single tablet's mutable binding-related state, behind whatever
/// reader-writer lock the surrounding engine uses. Every method here
/// acquires that lock itself (read for the getters, write for the
/// setters) — the coordinator never assumes it already holds one.
pub trait Tablet: Send + Sync {
    fn tablet_id(&self) -> TabletId;

    /// Current `TxSlot`, read-locked.
    fn get_tx_data(&self) -> TxSlot;

    /// Persists a new `TxSlot`, write-locked. `memtable_log_ts` and
    /// `ref_op` are bookkeeping fields passed straight through to the
    /// memtable layer; this crate forwards them unchanged to the concrete
    /// `Tablet` implementation rather than interpreting them, since
    /// memtable reference counting is outside the coordinator's scope
    /// (`spec.md` §1 Non-goals).
    fn set_tx_data(
        &self,
        slot: TxSlot,
        memtable_log_ts: LogTs,
        for_replay: bool,
        ref_op: MemtableRefOp,
        is_callback: bool,
    );

    /// Current `BindingRecord`, read-locked.
    fn get_ddl_data(&self) -> BindingRecord;

    /// Persists a new `BindingRecord` via the commit write path.
    fn set_multi_data_for_commit(&self, record: BindingRecord, log_ts: LogTs, for_replay: bool, ref_op: MemtableRefOp);

    /// Persists the finalized `TxSlot` (commit or abort), write-locked.
    fn set_tablet_final_status(&self, slot: TxSlot, memtable_log_ts: LogTs, for_replay: bool, ref_op: MemtableRefOp);

    /// Idempotent back-fill used by [`crate::recovery`]: decrements
    /// `unsynced_cnt` for `record`'s commit iff it has not already been
    /// decremented for that commit. Returns whether a decrement actually
    /// happened (exposed so callers/tests can observe idempotence).
    fn back_fill_log_ts_for_commit(&self, record: &BindingRecord) -> bool;
}

/// Resolves `(log stream, tablet)` pairs to tablet handles.
pub trait TabletStore: Send + Sync {
    fn get_tablet(&self, key: TabletMapKey) -> Result<Arc<dyn Tablet>, GetTabletError>;
}

/// Process-wide pinned-tablet bookkeeping. `insert_pinned_tablet` and
/// `erase_pinned_tablet` must be called exactly once per lock/unlock pair
/// (`spec.md` §5).
pub trait MetaMemoryManager: Send + Sync {
    fn insert_pinned_tablet(&self, key: TabletMapKey);
    fn erase_pinned_tablet(&self, key: TabletMapKey);
}

/// A log stream: the replication unit containing tablets and their redo
/// log.
pub trait LogStream: Send + Sync {
    fn id(&self) -> LsId;

    /// The checkpoint log ts below which deleted tablets are guaranteed
    /// gone for good (`spec.md` §4.7).
    fn get_tablet_change_checkpoint_ts(&self) -> LogTs;
}

/// Tenant-scoped lookup of a log stream by id.
pub trait LogStreamService: Send + Sync {
    fn get_ls(&self, ls_id: LsId) -> Result<Arc<dyn LogStream>, GetTabletError>;
}

/// Tagged union standing in for a duck-typed `ObIMultiSourceDataUnit`
/// dispatch (`spec.md` §9 design note). The coordinator only ever produces
/// or consumes the `Binding` variant; `TabletTxState` is included so
/// callers modeling the same per-tablet multi-source slot (tx status
/// alongside binding info) have a single sum type to dispatch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiSourceUnit {
    Binding(BindingRecord),
    TabletTxState(TxSlot),
}

impl MultiSourceUnit {
    /// Deep-copies the contained unit. Trivial in Rust (the variants are
    /// owned, `Clone` data) but kept as an explicit operation so the tag
    /// dispatch this type exists to model stays visible at the call site.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}
