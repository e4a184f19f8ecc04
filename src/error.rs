//! Error kinds for the coordinator, mirroring `spec.md` §7.
//!
//! A single enum is returned by every fallible coordinator operation, the
//! way `spacetimedb-core`'s `DBError` is the one error type threaded
//! through `db::datastore`. Unlike `DBError` we don't need a grab-bag of
//! `#[from]` conversions from a dozen subsystems — the coordinator's error
//! surface is small and closed, so it's listed directly rather than
//! composed from sub-enums.

use thiserror::Error;

use crate::ids::TabletId;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Error kinds a coordinator operation can return. Each corresponds to a
/// control-flow outcome the DDL executor or replay applier must interpret,
/// never a generic "something went wrong".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Slot contended by another transaction, or replay is waiting on a
    /// tablet that may yet appear. Caller reissues the operation.
    #[error("tablet binding locked by another transaction, retry")]
    Retry,

    /// Benign skip: the target tablet does not exist, or is already frozen
    /// past the incoming log ts. Batch steps treat this as success.
    #[error("no update needed")]
    NoUpdateNeeded,

    /// Reader used a stale schema version; caller recompiles the query.
    #[error("schema version is stale, retry")]
    SchemaRetry,

    /// Reader's snapshot predates this binding's activation.
    #[error("snapshot has been discarded")]
    SnapshotDiscarded,

    /// A protocol invariant was violated (e.g. `set_log_ts` on an unlocked
    /// slot, an out-of-range log ts, an impossible `unsynced_cnt`).
    #[error("unexpected protocol violation on tablet {tablet_id}: {reason}")]
    Unexpected { tablet_id: TabletId, reason: String },

    /// Malformed input DTO.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CoordinatorError {
    pub fn unexpected(tablet_id: TabletId, reason: impl Into<String>) -> Self {
        CoordinatorError::Unexpected {
            tablet_id,
            reason: reason.into(),
        }
    }

    /// True for the two error kinds a batch driver treats as "keep going",
    /// i.e. it should not trigger a compensating rollback.
    pub fn is_benign_skip(&self) -> bool {
        matches!(self, CoordinatorError::NoUpdateNeeded)
    }
}
