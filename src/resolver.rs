//! The tablet resolver (`spec.md` §4.7): turns a raw `TabletStore` lookup
//! into the handle-or-benign-skip outcome every other component in this
//! crate consumes.

use std::sync::Arc;

use crate::error::{CoordinatorError, Result};
use crate::ids::TabletMapKey;
use crate::store::{GetTabletError, LogStream, Tablet, TabletStore};
use crate::tx_slot::TabletStatus;

/// Resolves `key` to a tablet handle, folding "doesn't exist" and
/// "already frozen past this log ts" into [`CoordinatorError::NoUpdateNeeded`]
/// so callers can treat them as a benign skip rather than special-casing
/// every lookup site.
pub fn resolve_tablet(
    store: &dyn TabletStore,
    ls: &dyn LogStream,
    key: TabletMapKey,
    flags: &crate::store::TransFlags,
) -> Result<Arc<dyn Tablet>> {
    match store.get_tablet(key) {
        Err(GetTabletError::NotExist) => {
            if !flags.for_replay {
                log::info!("tablet {:?} removed, no update needed", key);
                Err(CoordinatorError::NoUpdateNeeded)
            } else if flags.log_ts < ls.get_tablet_change_checkpoint_ts() {
                log::warn!(
                    "tablet {:?} already deleted before checkpoint, no update needed",
                    key
                );
                Err(CoordinatorError::NoUpdateNeeded)
            } else {
                log::info!("tablet {:?} does not exist yet, but need retry", key);
                Err(CoordinatorError::Retry)
            }
        }
        Err(GetTabletError::Retry) => Err(CoordinatorError::Retry),
        Ok(tablet) => {
            let tx_data = tablet.get_tx_data();
            if flags.for_replay && tx_data.tablet_status == TabletStatus::Deleted {
                log::info!("tablet {:?} is already deleted, no update needed", key);
                return Err(CoordinatorError::NoUpdateNeeded);
            }
            // The frozen check guards against a log ts that's stale relative to
            // what's *already* durably past this point — either finalized by
            // someone else, or (during idempotent replay) by this same tx_id's
            // own earlier pass. It must not fire while `flags.tx_id` is still
            // the slot's active holder: `set_log_ts` legitimately advances
            // `tx_log_ts` to this exact commit's log ts mid-flight, and the
            // later `modify_binding`/`unlock` steps of that same flow re-resolve
            // under the identical flags and must still see the tablet.
            let held_by_me = tx_data.tx_id == flags.tx_id;
            if !held_by_me && !flags.log_ts.is_invalid() && tx_data.tx_log_ts != crate::ids::LogTs::MAX && flags.log_ts <= tx_data.tx_log_ts {
                log::info!("tablet {:?} frozen at {:?}, no update needed", key, tx_data.tx_log_ts);
                return Err(CoordinatorError::NoUpdateNeeded);
            }
            Ok(tablet)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{LogTs, LsId, TabletId, TxId};
    use crate::memory::{InMemoryLogStream, InMemoryTabletStore};
    use crate::store::{NotifyType, TransFlags};

    fn flags(log_ts: i64, for_replay: bool) -> TransFlags {
        let mut f = TransFlags::new(TxId(1), LogTs(log_ts), NotifyType::OnCommit);
        f.for_replay = for_replay;
        f
    }

    #[test]
    fn missing_tablet_forward_path_is_no_update_needed() {
        let store = InMemoryTabletStore::new();
        let ls = InMemoryLogStream::new(LsId(1), LogTs(0));
        let key = TabletMapKey::new(LsId(1), TabletId(404));
        let err = resolve_tablet(&store, &ls, key, &flags(10, false)).unwrap_err();
        assert_eq!(err, CoordinatorError::NoUpdateNeeded);
    }

    #[test]
    fn missing_tablet_replay_before_checkpoint_is_no_update_needed() {
        let store = InMemoryTabletStore::new();
        let ls = InMemoryLogStream::new(LsId(1), LogTs(100));
        let key = TabletMapKey::new(LsId(1), TabletId(404));
        let err = resolve_tablet(&store, &ls, key, &flags(10, true)).unwrap_err();
        assert_eq!(err, CoordinatorError::NoUpdateNeeded);
    }

    #[test]
    fn missing_tablet_replay_after_checkpoint_retries() {
        let store = InMemoryTabletStore::new();
        let ls = InMemoryLogStream::new(LsId(1), LogTs(1));
        let key = TabletMapKey::new(LsId(1), TabletId(404));
        let err = resolve_tablet(&store, &ls, key, &flags(10, true)).unwrap_err();
        assert_eq!(err, CoordinatorError::Retry);
    }

    #[test]
    fn frozen_tablet_is_no_update_needed() {
        let store = InMemoryTabletStore::new();
        let key = TabletMapKey::new(LsId(1), TabletId(1));
        store.create_tablet(key);
        let tablet = store.get_tablet(key).unwrap();
        let mut slot = tablet.get_tx_data();
        slot.tx_log_ts = LogTs(50);
        tablet.set_tx_data(slot, LogTs(50), false, crate::store::MemtableRefOp::None, false);

        let ls = InMemoryLogStream::new(LsId(1), LogTs(0));
        let err = resolve_tablet(&store, &ls, key, &flags(50, false)).unwrap_err();
        assert_eq!(err, CoordinatorError::NoUpdateNeeded);
    }

    /// A slot still actively held by `flags.tx_id` must never be treated as
    /// frozen against that same tx's own log ts — `set_log_ts` advances
    /// `tx_log_ts` to exactly this value mid-flight, and later steps of the
    /// same commit (`modify_binding`, `unlock`) resolve again under the
    /// identical flags.
    #[test]
    fn own_active_lock_is_not_treated_as_frozen() {
        let store = InMemoryTabletStore::new();
        let key = TabletMapKey::new(LsId(1), TabletId(1));
        store.create_tablet(key);
        let tablet = store.get_tablet(key).unwrap();
        let mut slot = tablet.get_tx_data();
        slot.tx_id = TxId(1);
        slot.tx_log_ts = LogTs(50);
        tablet.set_tx_data(slot, LogTs(50), false, crate::store::MemtableRefOp::None, false);

        let ls = InMemoryLogStream::new(LsId(1), LogTs(0));
        assert!(resolve_tablet(&store, &ls, key, &flags(50, false)).is_ok());
    }
}
