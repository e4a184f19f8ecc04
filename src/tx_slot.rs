//! [`TxSlot`]: the per-tablet transactional state stored adjacent to the
//! tablet object. See `spec.md` §3.1, §3.2 invariants 2–6, and §4.8 for the
//! state machine this type walks through.

use crate::ids::{LogTs, TxId};

/// Coarse tablet lifecycle status, orthogonal to the binding transaction
/// state. The coordinator only reads this (via
/// [`crate::store::Tablet::get_tx_data`]) to decide whether a tablet found
/// by the resolver should be treated as gone (`spec.md` §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabletStatus {
    Normal,
    Deleted,
}

impl Default for TabletStatus {
    fn default() -> Self {
        TabletStatus::Normal
    }
}

/// Per-tablet transactional slot. Initialized `(tx_id = INVALID, tx_log_ts =
/// INVALID)`, walks `Empty -> Locked -> Redoed -> Final -> Empty` (new tx),
/// per `spec.md` §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSlot {
    pub tx_id: TxId,
    pub tx_log_ts: LogTs,
    pub tablet_status: TabletStatus,
    /// Number of outstanding multi-source data updates awaiting durable
    /// log-ts assignment. Bounded in `{0, 1, 2}` by the protocol
    /// (invariant 6); see [`TxSlot::inc_unsynced`] / [`TxSlot::dec_unsynced`].
    pub unsynced_cnt: u8,
}

impl Default for TxSlot {
    fn default() -> Self {
        Self {
            tx_id: TxId::INVALID,
            tx_log_ts: LogTs::INVALID,
            tablet_status: TabletStatus::Normal,
            unsynced_cnt: 0,
        }
    }
}

impl TxSlot {
    /// A slot is held whenever its tx id is neither the unlocked nor the
    /// finalized sentinel.
    pub fn is_locked(&self) -> bool {
        self.tx_id.is_valid() && !self.tx_id.is_final()
    }

    /// Whether `tx_id` is currently the one holding this slot (invariant 3:
    /// reentrancy is defined relative to this check).
    pub fn is_locked_by(&self, tx_id: TxId) -> bool {
        self.tx_id == tx_id
    }

    /// Increments `unsynced_cnt`, saturating at 2 — the protocol never
    /// legitimately requests a third outstanding update, so a caller
    /// hitting the clamp indicates a bug upstream rather than something
    /// this type should panic over.
    pub fn inc_unsynced(&mut self) {
        if self.unsynced_cnt < 2 {
            self.unsynced_cnt += 1;
        }
    }

    /// Decrements `unsynced_cnt`, saturating at 0.
    pub fn dec_unsynced(&mut self) {
        self.unsynced_cnt = self.unsynced_cnt.saturating_sub(1);
    }

    /// True once an unlock (commit or abort) has moved this slot to `FINAL`.
    pub fn is_final(&self) -> bool {
        self.tx_id.is_final()
    }
}
