//! [`LockManager`]: acquires and releases a tablet's [`TxSlot`] under a
//! transaction id, with reentrancy, and keeps the Meta-Memory Manager pin
//! count balanced across the lock/unlock pair (`spec.md` §4.1, §4.3).

use crate::error::{CoordinatorError, Result};
use crate::ids::{LogTs, TabletMapKey, TxId};
use crate::resolver::resolve_tablet;
use crate::store::{LogStream, MemtableRefOp, MetaMemoryManager, NotifyType, TabletStore, TransFlags};

/// Stateless: every call takes the collaborators and key it needs. The only
/// state that spans a batch of these calls is the caller's `PrepareCtx`
/// (`spec.md` §3.1), which [`crate::batch::BatchDriver`] owns.
pub struct LockManager;

impl LockManager {
    /// `spec.md` §4.1. Resolves `key`, then either acquires the slot for
    /// `flags.tx_id`, no-ops if `flags.tx_id` already holds it, or fails
    /// *retry* if a different transaction holds it.
    pub fn lock(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        key: TabletMapKey,
        flags: &TransFlags,
    ) -> Result<()> {
        let tablet = resolve_tablet(store, ls, key, flags)?;
        let mut slot = tablet.get_tx_data();

        if slot.is_locked() {
            if !slot.is_locked_by(flags.tx_id) {
                log::info!(
                    "tablet {:?} binding lock contended: held by {:?}, {:?} retrying",
                    key,
                    slot.tx_id,
                    flags.tx_id
                );
                return Err(CoordinatorError::Retry);
            }
            log::trace!("tablet {:?} binding lock reentrant for {:?}", key, flags.tx_id);
        } else {
            slot.tx_id = flags.tx_id;
            if flags.for_replay {
                slot.tx_log_ts = flags.log_ts;
            } else if slot.tx_log_ts.is_invalid() {
                // First-ever lock of this slot: the redo phase hasn't run
                // yet, so it takes the locked-but-not-redoed sentinel
                // (`spec.md` §4.8: "Locked(tx, ts=MAX or old)"). A slot
                // re-locked after a prior finalization keeps its last
                // committed ts (the "or old" branch) by falling through
                // unchanged here.
                slot.tx_log_ts = LogTs::MAX;
            }
            let memtable_log_ts = if flags.for_replay { flags.log_ts } else { LogTs::MAX };
            let ref_op = if flags.for_replay { MemtableRefOp::None } else { MemtableRefOp::IncRef };
            tablet.set_tx_data(slot, memtable_log_ts, flags.for_replay, ref_op, false);
            log::debug!("tablet {:?} binding locked by {:?}", key, flags.tx_id);
        }

        meta.insert_pinned_tablet(key);
        Ok(())
    }

    /// `spec.md` §4.3. Finalizes the slot on commit or abort, applying the
    /// abort-decrement table to decide whether `unsynced_cnt` is
    /// decremented, and unpins the tablet.
    ///
    /// `is_tx_end` selects which row of the abort-decrement table applies —
    /// true for the transaction-end notification, false for an intermediate
    /// one — mirroring the source's separate `is_tx_end` call site tag.
    pub fn unlock(
        store: &dyn TabletStore,
        ls: &dyn LogStream,
        meta: &dyn MetaMemoryManager,
        key: TabletMapKey,
        flags: &TransFlags,
        is_tx_end: bool,
    ) -> Result<()> {
        let tablet = resolve_tablet(store, ls, key, flags)?;
        let mut slot = tablet.get_tx_data();

        if slot.tx_id != flags.tx_id {
            log::info!("tablet {:?} already unlocked, {:?} treating as reentrant success", key, flags.tx_id);
            return Ok(());
        }

        if flags.for_replay && flags.log_ts <= slot.tx_log_ts {
            log::info!("tablet {:?} unlock already applied at replay log ts {:?}", key, flags.log_ts);
            return Ok(());
        }

        let is_commit = matches!(flags.notify_type, NotifyType::OnCommit);
        if is_commit {
            if !flags.log_ts.in_commit_range() {
                return Err(CoordinatorError::unexpected(
                    tablet.tablet_id(),
                    format!("commit log ts {:?} out of range", flags.log_ts),
                ));
            }
            if slot.tx_log_ts != LogTs::MAX && !slot.tx_log_ts.is_invalid() && !slot.tx_log_ts.in_commit_range() {
                return Err(CoordinatorError::unexpected(
                    tablet.tablet_id(),
                    format!("stored log ts {:?} out of range at commit", slot.tx_log_ts),
                ));
            }
        }

        let need_dec = match (is_tx_end, slot.unsynced_cnt) {
            (true, 2) => true,
            (true, 1) => false,
            (false, 1) => true,
            (false, 0) => false,
            (tx_end, cnt) => {
                return Err(CoordinatorError::unexpected(
                    tablet.tablet_id(),
                    format!("unsynced_cnt {} impossible for is_tx_end={}", cnt, tx_end),
                ))
            }
        };

        let abort_without_redo = !is_commit && !flags.for_replay && !flags.is_redo_synced;
        let chosen_log_ts = if abort_without_redo { slot.tx_log_ts } else { flags.log_ts };

        if need_dec {
            slot.dec_unsynced();
        }
        slot.tx_id = TxId::FINAL;
        slot.tx_log_ts = chosen_log_ts;

        let memtable_log_ts = if chosen_log_ts.is_invalid() { LogTs::MAX } else { chosen_log_ts };
        let ref_op = if need_dec { MemtableRefOp::DecRef } else { MemtableRefOp::None };
        tablet.set_tablet_final_status(slot, memtable_log_ts, flags.for_replay, ref_op);

        meta.erase_pinned_tablet(key);
        log::debug!("tablet {:?} unlocked by {:?} ({:?})", key, flags.tx_id, flags.notify_type);
        Ok(())
    }

    /// Recovered from `original_source/`'s `check_is_locked`: gates a
    /// binding mutation on `tx_id` still holding the slot. Used by
    /// [`crate::batch::BatchDriver`] immediately before it mutates a
    /// `BindingRecord`.
    pub fn is_locked_by(store: &dyn TabletStore, key: TabletMapKey, tx_id: TxId) -> Result<bool> {
        let tablet = store.get_tablet(key).map_err(|_| CoordinatorError::NoUpdateNeeded)?;
        Ok(tablet.get_tx_data().is_locked_by(tx_id))
    }
}
