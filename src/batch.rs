//! [`BatchDriver`]: orchestrates the create and unbind flows across arrays
//! of tablets, implementing the skip-set rule that avoids double-processing
//! an aux entry already covered by its hidden-side companion (`spec.md`
//! §4.4).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};
use crate::ids::{LsId, TabletId, TabletMapKey, TenantId, Version};
use crate::lock_manager::LockManager;
use crate::log_ts_binder::LogTsBinder;
use crate::store::{LogStream, MemtableRefOp, MetaMemoryManager, NotifyType, TabletStore, TransFlags};

/// How a table schema entry referenced by a `pure_aux` descriptor classifies,
/// driving which `BindingRecord` field a created aux tablet id lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSchemaKind {
    AuxLobMeta,
    AuxLobPiece,
    Other,
}

/// One create-request entry's sub-descriptor (`spec.md` §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateEntryKind {
    /// `tablet_ids` are hidden siblings of the entry's data tablet; the
    /// data tablet itself is not being created by this request.
    PureHidden { tablet_ids: Vec<TabletId> },
    /// `tablet_ids` are auxiliary tablets of the entry's data tablet.
    /// `table_schema_index[i]` indexes `BatchCreateArg::table_schemas` to
    /// classify `tablet_ids[i]`.
    PureAux {
        tablet_ids: Vec<TabletId>,
        table_schema_index: Vec<usize>,
    },
    /// Locked implicitly by the creation protocol; the binding coordinator
    /// skips these entirely.
    Mixed,
}

/// A single entry of a batch create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEntry {
    pub data_tablet_id: TabletId,
    pub kind: CreateEntryKind,
}

/// Batch create request. Not wire-serialized (only `BindingRecord` and
/// `BatchUnbindArg` carry that requirement per `spec.md` §6); `table_schemas`
/// and `entries` are assembled in-process from the DDL executor's request.
#[derive(Debug, Clone)]
pub struct BatchCreateArg {
    pub tenant_id: TenantId,
    pub ls_id: LsId,
    pub schema_version: Version,
    pub table_schemas: Vec<TableSchemaKind>,
    pub entries: Vec<CreateEntry>,
}

/// Batch unbind request. Field order is the wire contract (`spec.md` §6):
/// `tenant_id, ls_id, schema_version, orig_tablet_ids, hidden_tablet_ids`.
/// `is_redefined` is a DDL-execution-time decision passed alongside this
/// arg, not part of it — it never appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUnbindArg {
    pub tenant_id: TenantId,
    pub ls_id: LsId,
    pub schema_version: Version,
    pub orig_tablet_ids: Vec<TabletId>,
    pub hidden_tablet_ids: Vec<TabletId>,
}

/// Prepare-phase accumulator for the create path (`spec.md` §3.1):
/// `last_idx` is a high-water mark into the eligible-entry traversal order,
/// `skip_idx` is the set of entry indices the skip-set rule excludes.
#[derive(Debug, Clone, Default)]
pub struct PrepareCtx {
    pub last_idx: usize,
    pub skip_idx: HashSet<usize>,
}

/// Prepare-phase accumulator for the unbind path: separate watermarks for
/// the original and hidden tablet arrays, since they are locked (and rolled
/// back) independently.
#[derive(Debug, Clone, Default)]
pub struct UnbindCtx {
    pub last_orig_idx: usize,
    pub last_hidden_idx: usize,
}

pub struct BatchDriver;

impl BatchDriver {
    /// The skip-set rule: for every `pure_hidden` entry's hidden tablet id,
    /// if some other entry's `data_tablet_id` equals that hidden id and is
    /// itself `pure_aux`, that entry's index is already reachable through
    /// the hidden entry and must not be processed again by the `pure_aux`
    /// pass.
    pub fn compute_skip_set(arg: &BatchCreateArg) -> HashSet<usize> {
        let mut skip = HashSet::new();
        for entry in &arg.entries {
            let CreateEntryKind::PureHidden { tablet_ids } = &entry.kind else {
                continue;
            };
            for hidden_id in tablet_ids {
                if let Some(j) = arg.entries.iter().position(|other| {
                    other.data_tablet_id == *hidden_id && matches!(other.kind, CreateEntryKind::PureAux { .. })
                }) {
                    skip.insert(j);
                }
            }
        }
        skip
    }

    fn has_lob(arg: &BatchCreateArg, entry: &CreateEntry) -> bool {
        match &entry.kind {
            CreateEntryKind::PureAux { table_schema_index, .. } => table_schema_index.iter().any(|&idx| {
                matches!(
                    arg.table_schemas.get(idx),
                    Some(TableSchemaKind::AuxLobMeta) | Some(TableSchemaKind::AuxLobPiece)
                )
            }),
            _ => false,
        }
    }

    /// The traversal order every create-phase pass shares: `pure_hidden`
    /// entries and LOB-bearing `pure_aux` entries, skip-set entries
    /// excluded.
    pub fn eligible_create_indices(arg: &BatchCreateArg, skip: &HashSet<usize>) -> Vec<usize> {
        arg.entries
            .iter()
            .enumerate()
            .filter(|(i, entry)| {
                if skip.contains(i) {
                    return false;
                }
                match &entry.kind {
                    CreateEntryKind::PureHidden { .. } => true,
                    CreateEntryKind::PureAux { .. } => Self::has_lob(arg, entry),
                    CreateEntryKind::Mixed => false,
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// `lock_for_create` (`spec.md` §4.4 step 1). On a non-replay failure,
    /// rolls back everything locked so far with `notify_type = OnAbort`.
    pub fn lock_for_create(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        arg: &BatchCreateArg,
        flags: &TransFlags,
        ctx: &mut PrepareCtx,
    ) -> Result<()> {
        ctx.skip_idx = Self::compute_skip_set(arg);
        let eligible = Self::eligible_create_indices(arg, &ctx.skip_idx);

        for (pos, &idx) in eligible.iter().enumerate() {
            let key = TabletMapKey::new(arg.ls_id, arg.entries[idx].data_tablet_id);
            match LockManager::lock(store, ls, meta, key, flags) {
                Ok(()) => {}
                Err(e) if e.is_benign_skip() => {}
                Err(e) => {
                    if !flags.for_replay {
                        let abort_flags = flags.as_abort();
                        for &rollback_idx in &eligible[..pos] {
                            let rollback_key = TabletMapKey::new(arg.ls_id, arg.entries[rollback_idx].data_tablet_id);
                            // is_tx_end=false: this rollback fires before modify_binding_for_create
                            // ever ran, so no multi-source unit has registered against unsynced_cnt
                            // yet (it is still at its default 0 — the only valid row for that case).
                            let _ = LockManager::unlock(store, ls, meta, rollback_key, &abort_flags, false);
                        }
                    }
                    return Err(e);
                }
            }
            ctx.last_idx = pos + 1;
        }
        Ok(())
    }

    /// `set_log_ts_for_create` (`spec.md` §4.4 step 2): same traversal,
    /// restricted to what `lock_for_create` actually locked.
    pub fn set_log_ts_for_create(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        binder: &LogTsBinder,
        arg: &BatchCreateArg,
        flags: &TransFlags,
        ctx: &PrepareCtx,
    ) -> Result<()> {
        let eligible = Self::eligible_create_indices(arg, &ctx.skip_idx);
        for &idx in &eligible[..ctx.last_idx] {
            let key = TabletMapKey::new(arg.ls_id, arg.entries[idx].data_tablet_id);
            match crate::resolver::resolve_tablet(store, ls, key, flags) {
                Ok(tablet) => {
                    binder.set_log_ts(&*tablet, flags.tx_id, flags.log_ts, flags.for_replay)?;
                }
                Err(e) if e.is_benign_skip() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// `modify_binding_for_create` (`spec.md` §4.4 step 3). Applies the
    /// recovered `check_is_locked` gate before mutating each entry's
    /// `BindingRecord`.
    pub fn modify_binding_for_create(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        arg: &BatchCreateArg,
        flags: &TransFlags,
        ctx: &PrepareCtx,
    ) -> Result<()> {
        let eligible = Self::eligible_create_indices(arg, &ctx.skip_idx);
        for &idx in &eligible[..ctx.last_idx] {
            let entry = &arg.entries[idx];
            let key = TabletMapKey::new(arg.ls_id, entry.data_tablet_id);
            let tablet = match crate::resolver::resolve_tablet(store, ls, key, flags) {
                Ok(tablet) => tablet,
                Err(e) if e.is_benign_skip() => continue,
                Err(e) => return Err(e),
            };

            if !LockManager::is_locked_by(store, key, flags.tx_id)? {
                log::warn!("tablet {:?} lost its lock before modify_binding_for_create", key);
                continue;
            }

            let mut record = tablet.get_ddl_data();
            match &entry.kind {
                CreateEntryKind::PureHidden { tablet_ids } => {
                    for id in tablet_ids {
                        record.add_hidden_tablet(*id);
                    }
                }
                CreateEntryKind::PureAux {
                    tablet_ids,
                    table_schema_index,
                } => {
                    for (i, id) in tablet_ids.iter().enumerate() {
                        match arg.table_schemas.get(table_schema_index[i]) {
                            Some(TableSchemaKind::AuxLobMeta) => record.set_lob_meta_tablet(*id),
                            Some(TableSchemaKind::AuxLobPiece) => record.set_lob_piece_tablet(*id),
                            _ => {}
                        }
                    }
                }
                CreateEntryKind::Mixed => {}
            }
            tablet.set_multi_data_for_commit(record, flags.log_ts, flags.for_replay, MemtableRefOp::None);
        }
        Ok(())
    }

    /// `unlock_for_create` (`spec.md` §4.4 step 4): commit or abort
    /// traversal over everything locked.
    ///
    /// Matches the open question in `spec.md` §9: does *not* re-check
    /// `check_is_locked` before unlocking — `LockManager::unlock` already
    /// treats a non-owning slot as a no-op, which is the same safety net
    /// the source relies on.
    ///
    /// `is_tx_end=false`: this batch never registers a second multi-source
    /// unit for the tablets it touches, so `unsynced_cnt` stays at its
    /// default 0 throughout — the abort-decrement table's only valid row
    /// for that count. A caller layering a tx-status unit on top of the
    /// binding one is responsible for its own accounting and its own call
    /// to `LockManager::unlock` with `is_tx_end=true`.
    pub fn unlock_for_create(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        arg: &BatchCreateArg,
        flags: &TransFlags,
        ctx: &PrepareCtx,
    ) -> Result<()> {
        let eligible = Self::eligible_create_indices(arg, &ctx.skip_idx);
        for &idx in &eligible[..ctx.last_idx] {
            let key = TabletMapKey::new(arg.ls_id, arg.entries[idx].data_tablet_id);
            match LockManager::unlock(store, ls, meta, key, flags, false) {
                Ok(()) | Err(CoordinatorError::NoUpdateNeeded) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// `lock_for_unbind`: locks `orig_tablet_ids`, and when `is_redefined`
    /// also `hidden_tablet_ids`, tracking independent watermarks.
    pub fn lock_for_unbind(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        arg: &BatchUnbindArg,
        is_redefined: bool,
        flags: &TransFlags,
        ctx: &mut UnbindCtx,
    ) -> Result<()> {
        for (pos, &id) in arg.orig_tablet_ids.iter().enumerate() {
            let key = TabletMapKey::new(arg.ls_id, id);
            if let Err(e) = LockManager::lock(store, ls, meta, key, flags) {
                if !e.is_benign_skip() {
                    if !flags.for_replay {
                        Self::rollback_unbind(store, ls, meta, arg, flags, ctx);
                    }
                    return Err(e);
                }
            }
            ctx.last_orig_idx = pos + 1;
        }

        if is_redefined {
            for (pos, &id) in arg.hidden_tablet_ids.iter().enumerate() {
                let key = TabletMapKey::new(arg.ls_id, id);
                if let Err(e) = LockManager::lock(store, ls, meta, key, flags) {
                    if !e.is_benign_skip() {
                        if !flags.for_replay {
                            Self::rollback_unbind(store, ls, meta, arg, flags, ctx);
                        }
                        return Err(e);
                    }
                }
                ctx.last_hidden_idx = pos + 1;
            }
        }
        Ok(())
    }

    fn rollback_unbind(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        arg: &BatchUnbindArg,
        flags: &TransFlags,
        ctx: &UnbindCtx,
    ) {
        let abort_flags = flags.as_abort();
        // is_tx_end=false: fires before modify_binding_for_unbind, so unsynced_cnt
        // is still at its default 0 for every tablet being rolled back here.
        for &id in &arg.hidden_tablet_ids[..ctx.last_hidden_idx] {
            let key = TabletMapKey::new(arg.ls_id, id);
            let _ = LockManager::unlock(store, ls, meta, key, &abort_flags, false);
        }
        for &id in &arg.orig_tablet_ids[..ctx.last_orig_idx] {
            let key = TabletMapKey::new(arg.ls_id, id);
            let _ = LockManager::unlock(store, ls, meta, key, &abort_flags, false);
        }
    }

    /// Unbind commit-modify phase (`spec.md` §4.4): resets `orig`'s hidden
    /// list, and when `is_redefined`, flips `orig` into the redefined state
    /// and stamps every `hidden` tablet with the post-redefinition binding.
    pub fn modify_binding_for_unbind(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        arg: &BatchUnbindArg,
        is_redefined: bool,
        commit_version: Version,
        flags: &TransFlags,
        ctx: &UnbindCtx,
    ) -> Result<()> {
        for &id in &arg.orig_tablet_ids[..ctx.last_orig_idx] {
            let key = TabletMapKey::new(arg.ls_id, id);
            let tablet = match crate::resolver::resolve_tablet(store, ls, key, flags) {
                Ok(t) => t,
                Err(e) if e.is_benign_skip() => continue,
                Err(e) => return Err(e),
            };
            if !LockManager::is_locked_by(store, key, flags.tx_id)? {
                log::warn!("tablet {:?} lost its lock before modify_binding_for_unbind (orig)", key);
                continue;
            }
            let mut record = tablet.get_ddl_data();
            record.clear_hidden_tablets();
            if is_redefined {
                record.redefined = true;
                record.snapshot_version = commit_version;
            }
            tablet.set_multi_data_for_commit(record, flags.log_ts, flags.for_replay, MemtableRefOp::None);
        }

        if is_redefined {
            for &id in &arg.hidden_tablet_ids[..ctx.last_hidden_idx] {
                let key = TabletMapKey::new(arg.ls_id, id);
                let tablet = match crate::resolver::resolve_tablet(store, ls, key, flags) {
                    Ok(t) => t,
                    Err(e) if e.is_benign_skip() => continue,
                    Err(e) => return Err(e),
                };
                if !LockManager::is_locked_by(store, key, flags.tx_id)? {
                    log::warn!("tablet {:?} lost its lock before modify_binding_for_unbind (hidden)", key);
                    continue;
                }
                let mut record = tablet.get_ddl_data();
                record.redefined = false;
                record.snapshot_version = commit_version;
                record.schema_version = arg.schema_version;
                tablet.set_multi_data_for_commit(record, flags.log_ts, flags.for_replay, MemtableRefOp::None);
            }
        }
        Ok(())
    }

    /// Unbind unlock phase: origs then hiddens.
    ///
    /// `is_tx_end=false` for the same reason as `unlock_for_create`: this
    /// batch never registers a second multi-source unit, so `unsynced_cnt`
    /// is always the default 0 here.
    pub fn unlock_for_unbind(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        arg: &BatchUnbindArg,
        flags: &TransFlags,
        ctx: &UnbindCtx,
    ) -> Result<()> {
        for &id in &arg.orig_tablet_ids[..ctx.last_orig_idx] {
            let key = TabletMapKey::new(arg.ls_id, id);
            match LockManager::unlock(store, ls, meta, key, flags, false) {
                Ok(()) | Err(CoordinatorError::NoUpdateNeeded) => {}
                Err(e) => return Err(e),
            }
        }
        for &id in &arg.hidden_tablet_ids[..ctx.last_hidden_idx] {
            let key = TabletMapKey::new(arg.ls_id, id);
            match LockManager::unlock(store, ls, meta, key, flags, false) {
                Ok(()) | Err(CoordinatorError::NoUpdateNeeded) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{LogTs, LsId, TabletId, TxId};
    use crate::memory::{InMemoryLogStream, InMemoryMetaMemoryManager, InMemoryTabletStore};
    use crate::store::TabletStore;

    fn s1_arg() -> BatchCreateArg {
        BatchCreateArg {
            tenant_id: TenantId(1),
            ls_id: LsId(1),
            schema_version: Version(9),
            table_schemas: vec![TableSchemaKind::AuxLobMeta, TableSchemaKind::AuxLobPiece],
            entries: vec![CreateEntry {
                data_tablet_id: TabletId(1001),
                kind: CreateEntryKind::PureAux {
                    tablet_ids: vec![TabletId(2001), TabletId(2002)],
                    table_schema_index: vec![0, 1],
                },
            }],
        }
    }

    #[test]
    fn s1_pure_aux_create_with_lob() {
        let store = InMemoryTabletStore::new();
        store.create_tablet(TabletMapKey::new(LsId(1), TabletId(1001)));
        let ls = InMemoryLogStream::new(LsId(1), LogTs(0));
        let meta = InMemoryMetaMemoryManager::new();
        let binder = LogTsBinder::new();
        let arg = s1_arg();

        let flags = TransFlags::new(TxId(1), LogTs(100), NotifyType::OnCommit);
        let mut ctx = PrepareCtx::default();
        BatchDriver::lock_for_create(&store, &ls, &meta, &arg, &flags, &mut ctx).unwrap();
        BatchDriver::set_log_ts_for_create(&store, &ls, &binder, &arg, &flags, &ctx).unwrap();
        BatchDriver::modify_binding_for_create(&store, &ls, &arg, &flags, &ctx).unwrap();
        BatchDriver::unlock_for_create(&store, &ls, &meta, &arg, &flags, &ctx).unwrap();

        let record = store.binding_of(TabletMapKey::new(LsId(1), TabletId(1001))).unwrap();
        assert_eq!(record.lob_meta_tablet_id, Some(TabletId(2001)));
        assert_eq!(record.lob_piece_tablet_id, Some(TabletId(2002)));
        assert!(record.hidden_tablet_ids.is_empty());
        assert!(!meta.is_pinned(TabletMapKey::new(LsId(1), TabletId(1001))));
    }

    #[test]
    fn s2_pure_hidden_create_has_no_duplicates_on_retry() {
        let store = InMemoryTabletStore::new();
        store.create_tablet(TabletMapKey::new(LsId(1), TabletId(3000)));
        let ls = InMemoryLogStream::new(LsId(1), LogTs(0));
        let meta = InMemoryMetaMemoryManager::new();
        let binder = LogTsBinder::new();
        let arg = BatchCreateArg {
            tenant_id: TenantId(1),
            ls_id: LsId(1),
            schema_version: Version(1),
            table_schemas: vec![],
            entries: vec![CreateEntry {
                data_tablet_id: TabletId(3000),
                kind: CreateEntryKind::PureHidden {
                    tablet_ids: vec![TabletId(3101), TabletId(3102)],
                },
            }],
        };

        for (tx, log_ts) in [(1u64, 100i64), (2u64, 101i64)] {
            let flags = TransFlags::new(TxId(tx), LogTs(log_ts), NotifyType::OnCommit);
            let mut ctx = PrepareCtx::default();
            BatchDriver::lock_for_create(&store, &ls, &meta, &arg, &flags, &mut ctx).unwrap();
            BatchDriver::set_log_ts_for_create(&store, &ls, &binder, &arg, &flags, &ctx).unwrap();
            BatchDriver::modify_binding_for_create(&store, &ls, &arg, &flags, &ctx).unwrap();
            BatchDriver::unlock_for_create(&store, &ls, &meta, &arg, &flags, &ctx).unwrap();
        }

        let record = store.binding_of(TabletMapKey::new(LsId(1), TabletId(3000))).unwrap();
        assert_eq!(record.hidden_tablet_ids, vec![TabletId(3101), TabletId(3102)]);
    }

    #[test]
    fn skip_set_excludes_aux_companion_of_hidden_entry() {
        let arg = BatchCreateArg {
            tenant_id: TenantId(1),
            ls_id: LsId(1),
            schema_version: Version(1),
            table_schemas: vec![TableSchemaKind::AuxLobMeta],
            entries: vec![
                CreateEntry {
                    data_tablet_id: TabletId(1),
                    kind: CreateEntryKind::PureHidden {
                        tablet_ids: vec![TabletId(2)],
                    },
                },
                CreateEntry {
                    data_tablet_id: TabletId(2),
                    kind: CreateEntryKind::PureAux {
                        tablet_ids: vec![TabletId(9)],
                        table_schema_index: vec![0],
                    },
                },
            ],
        };
        let skip = BatchDriver::compute_skip_set(&arg);
        assert!(skip.contains(&1));
        let eligible = BatchDriver::eligible_create_indices(&arg, &skip);
        assert_eq!(eligible, vec![0]);
    }
}
