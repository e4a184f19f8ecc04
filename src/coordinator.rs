//! [`BindingCoordinator`]: the crate's single entry point, wiring the
//! constructor-injected external collaborators (`spec.md` §9 "Global tenant
//! context") into the leaf components above. Stateless across calls aside
//! from the transient `PrepareCtx`/`UnbindCtx` each caller owns, and the
//! [`LogTsBinder`]'s retry counter.

use std::sync::Arc;

use crate::batch::{BatchCreateArg, BatchDriver, BatchUnbindArg, PrepareCtx, UnbindCtx};
use crate::error::Result;
use crate::ids::{LsId, TabletMapKey, TxId, Version};
use crate::lock_manager::LockManager;
use crate::log_ts_binder::LogTsBinder;
use crate::recovery::Recovery;
use crate::store::{LogStreamService, MetaMemoryManager, TabletStore, TransFlags};
use crate::visibility::Visibility;

/// Binds together the three external collaborators `spec.md` §6 names and
/// exposes one method per coordinator operation. Construct one per tenant
/// (or per test), not per call — it is cheap and `Send + Sync`.
pub struct BindingCoordinator {
    store: Arc<dyn TabletStore>,
    meta: Arc<dyn MetaMemoryManager>,
    log_streams: Arc<dyn LogStreamService>,
    log_ts_binder: LogTsBinder,
}

impl BindingCoordinator {
    pub fn new(store: Arc<dyn TabletStore>, meta: Arc<dyn MetaMemoryManager>, log_streams: Arc<dyn LogStreamService>) -> Self {
        Self {
            store,
            meta,
            log_streams,
            log_ts_binder: LogTsBinder::new(),
        }
    }

    /// Number of times `set_log_ts` has observed a retried redo; see
    /// `spec.md` §9's open question on silent overwrite.
    pub fn redo_retry_count(&self) -> u64 {
        self.log_ts_binder.redo_retry_count()
    }

    fn ls(&self, ls_id: LsId) -> Result<Arc<dyn crate::store::LogStream>> {
        self.log_streams
            .get_ls(ls_id)
            .map_err(|_| crate::error::CoordinatorError::unexpected(crate::ids::TabletId(0), "unknown log stream"))
    }

    /// Locks a single tablet binding slot for `tx_id` (`spec.md` §4.1).
    pub fn lock(&self, key: TabletMapKey, flags: &TransFlags) -> Result<()> {
        let ls = self.ls(key.ls_id)?;
        LockManager::lock(self.store.as_ref(), ls.as_ref(), self.meta.as_ref(), key, flags)
    }

    /// Binds the redo-phase log ts for a single tablet (`spec.md` §4.2).
    pub fn set_log_ts(&self, key: TabletMapKey, tx_id: TxId, log_ts: crate::ids::LogTs, for_replay: bool) -> Result<()> {
        let ls = self.ls(key.ls_id)?;
        let flags = TransFlags {
            tx_id,
            log_ts,
            for_replay,
            notify_type: crate::store::NotifyType::OnCommit,
            commit_version: Version::MAX,
            is_redo_synced: true,
        };
        let tablet = crate::resolver::resolve_tablet(self.store.as_ref(), ls.as_ref(), key, &flags)?;
        self.log_ts_binder.set_log_ts(tablet.as_ref(), tx_id, log_ts, for_replay)?;
        Ok(())
    }

    /// Commits or aborts a single tablet binding slot (`spec.md` §4.3).
    pub fn unlock(&self, key: TabletMapKey, flags: &TransFlags, is_tx_end: bool) -> Result<()> {
        let ls = self.ls(key.ls_id)?;
        LockManager::unlock(self.store.as_ref(), ls.as_ref(), self.meta.as_ref(), key, flags, is_tx_end)
    }

    /// Runs the full batch create sequence: lock, set_log_ts, modify,
    /// unlock, exactly as `spec.md` §4.4 orders them.
    pub fn create_tablet_bindings(&self, arg: &BatchCreateArg, flags: &TransFlags) -> Result<PrepareCtx> {
        let ls = self.ls(arg.ls_id)?;
        let mut ctx = PrepareCtx::default();
        BatchDriver::lock_for_create(self.store.as_ref(), ls.as_ref(), self.meta.as_ref(), arg, flags, &mut ctx)?;
        BatchDriver::set_log_ts_for_create(self.store.as_ref(), ls.as_ref(), &self.log_ts_binder, arg, flags, &ctx)?;
        BatchDriver::modify_binding_for_create(self.store.as_ref(), ls.as_ref(), arg, flags, &ctx)?;
        BatchDriver::unlock_for_create(self.store.as_ref(), ls.as_ref(), self.meta.as_ref(), arg, flags, &ctx)?;
        Ok(ctx)
    }

    /// Runs the full batch unbind sequence (`spec.md` §4.4 unbind phases).
    pub fn unbind_tablet_bindings(
        &self,
        arg: &BatchUnbindArg,
        is_redefined: bool,
        commit_version: Version,
        flags: &TransFlags,
    ) -> Result<UnbindCtx> {
        let ls = self.ls(arg.ls_id)?;
        let mut ctx = UnbindCtx::default();
        BatchDriver::lock_for_unbind(self.store.as_ref(), ls.as_ref(), self.meta.as_ref(), arg, is_redefined, flags, &mut ctx)?;
        BatchDriver::modify_binding_for_unbind(self.store.as_ref(), ls.as_ref(), arg, is_redefined, commit_version, flags, &ctx)?;
        BatchDriver::unlock_for_unbind(self.store.as_ref(), ls.as_ref(), self.meta.as_ref(), arg, flags, &ctx)?;
        Ok(ctx)
    }

    /// `spec.md` §4.6: rejects a query compiled against a stale schema.
    pub fn check_schema_version(&self, key: TabletMapKey, ver: Version) -> Result<()> {
        let tablet = self.store.get_tablet(key).map_err(|_| crate::error::CoordinatorError::NoUpdateNeeded)?;
        Visibility::check_schema_version(tablet.as_ref(), ver)
    }

    /// `spec.md` §4.6: rejects a snapshot that can no longer see this
    /// tablet's current binding.
    pub fn check_snapshot_readable(&self, key: TabletMapKey, snap: Version) -> Result<()> {
        let tablet = self.store.get_tablet(key).map_err(|_| crate::error::CoordinatorError::NoUpdateNeeded)?;
        Visibility::check_snapshot_readable(tablet.as_ref(), snap)
    }

    /// `spec.md` §4.5 recovery entry point for a single tablet.
    pub fn fix_unsynced_cnt_for_binding_info(&self, key: TabletMapKey) {
        Recovery::fix_unsynced_cnt_for_binding_info(self.store.as_ref(), key);
    }

    /// Batch-shaped recovery sweeps recovered from `original_source/`.
    pub fn recover_create_batch(&self, arg: &BatchCreateArg) {
        Recovery::recover_create_batch(self.store.as_ref(), arg);
    }

    pub fn recover_unbind_batch(&self, arg: &BatchUnbindArg, is_redefined: bool) {
        Recovery::recover_unbind_batch(self.store.as_ref(), arg, is_redefined);
    }
}
