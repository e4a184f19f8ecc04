//! Identity and sentinel types shared across the coordinator.
//!
//! Every sentinel mentioned in `spec.md` §6 is attached as an associated
//! constant on the type it sentinels, the way `ObTabletCommon::FINAL_TX_ID`
//! hangs off the type it guards rather than sitting as a bare free-floating
//! constant.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Identifies a tenant. Opaque to the coordinator; forwarded to
/// [`crate::store::LogStreamService`] lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
pub struct TenantId(pub u64);

/// Identifies a log stream (the replication unit a tablet lives in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
pub struct LsId(pub u64);

/// Identifies a tablet within a log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
pub struct TabletId(pub u64);

/// Identifies the transaction currently holding (or that last held) a
/// tablet's [`crate::tx_slot::TxSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl TxId {
    /// Unlocked / never-locked sentinel.
    pub const INVALID: TxId = TxId(0);

    /// Assigned to a slot once its owning transaction has finalized
    /// (committed or aborted). A fresh `lock` with a new tx id transitions
    /// the slot out of this state.
    pub const FINAL: TxId = TxId(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != TxId::INVALID
    }

    pub fn is_final(self) -> bool {
        self == TxId::FINAL
    }
}

/// A durable log timestamp, or one of the sentinels below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
pub struct LogTs(pub i64);

impl LogTs {
    /// Not yet assigned a log ts (before lock, or aborted without redo).
    pub const INVALID: LogTs = LogTs(-1);

    /// Sentinel held by a locked-but-not-yet-redoed slot on the forward
    /// path; replaced by the real log ts in [`crate::log_ts_binder`].
    pub const MAX: LogTs = LogTs(i64::MAX);

    /// Lower bound (inclusive) of a valid committed log ts, per
    /// `LogTsRange::MIN_TS`.
    pub const MIN_TS: LogTs = LogTs(1);

    /// Upper bound (exclusive) of a valid committed log ts, per
    /// `LogTsRange::MAX_TS`.
    pub const MAX_TS: LogTs = LogTs(i64::MAX);

    pub fn is_invalid(self) -> bool {
        self == LogTs::INVALID
    }

    /// True iff `self` lies in `[MIN_TS, MAX_TS)`, the range commit-path log
    /// timestamps must fall in.
    pub fn in_commit_range(self) -> bool {
        self >= LogTs::MIN_TS && self < LogTs::MAX_TS
    }
}

/// A snapshot or schema version. `MAX` means "unset" (see
/// [`crate::binding_record::BindingRecord::is_valid`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
pub struct Version(pub i64);

impl Version {
    /// Sentinel meaning "never set".
    pub const MAX: Version = Version(i64::MAX);

    pub fn is_unset(self) -> bool {
        self == Version::MAX
    }
}

/// Key a [`crate::store::TabletStore`] is looked up by: `(log stream, tablet)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TabletMapKey {
    pub ls_id: LsId,
    pub tablet_id: TabletId,
}

impl TabletMapKey {
    pub fn new(ls_id: LsId, tablet_id: TabletId) -> Self {
        Self { ls_id, tablet_id }
    }
}
