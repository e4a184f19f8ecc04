//! Literal end-to-end scenarios from `spec.md` §8 (S1–S6), run against the
//! in-memory reference collaborators in [`tablet_binding_coordinator::memory`].

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tablet_binding_coordinator::batch::{
    BatchCreateArg, BatchUnbindArg, CreateEntry, CreateEntryKind, TableSchemaKind,
};
use tablet_binding_coordinator::coordinator::BindingCoordinator;
use tablet_binding_coordinator::error::CoordinatorError;
use tablet_binding_coordinator::ids::{LogTs, LsId, TabletId, TabletMapKey, TenantId, TxId, Version};
use tablet_binding_coordinator::memory::{
    InMemoryLogStream, InMemoryLogStreamService, InMemoryMetaMemoryManager, InMemoryTabletStore,
};
use tablet_binding_coordinator::store::{NotifyType, TransFlags};

struct Harness {
    coordinator: BindingCoordinator,
    store: Arc<InMemoryTabletStore>,
}

fn harness(ls_id: LsId) -> Harness {
    let _ = env_logger::try_init();
    let store = Arc::new(InMemoryTabletStore::new());
    let meta = Arc::new(InMemoryMetaMemoryManager::new());
    let log_streams = Arc::new(InMemoryLogStreamService::new());
    log_streams.register(Arc::new(InMemoryLogStream::new(ls_id, LogTs(0))));
    let coordinator = BindingCoordinator::new(store.clone(), meta, log_streams);
    Harness { coordinator, store }
}

#[test]
fn s1_pure_aux_create_with_lob() {
    let ls_id = LsId(1);
    let h = harness(ls_id);
    h.store.create_tablet(TabletMapKey::new(ls_id, TabletId(1001)));

    let arg = BatchCreateArg {
        tenant_id: TenantId(1),
        ls_id,
        schema_version: Version(9),
        table_schemas: vec![TableSchemaKind::AuxLobMeta, TableSchemaKind::AuxLobPiece],
        entries: vec![CreateEntry {
            data_tablet_id: TabletId(1001),
            kind: CreateEntryKind::PureAux {
                tablet_ids: vec![TabletId(2001), TabletId(2002)],
                table_schema_index: vec![0, 1],
            },
        }],
    };
    let flags = TransFlags::new(TxId(1), LogTs(100), NotifyType::OnCommit);
    h.coordinator.create_tablet_bindings(&arg, &flags).unwrap();

    let record = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(1001))).unwrap();
    assert_eq!(record.lob_meta_tablet_id, Some(TabletId(2001)));
    assert_eq!(record.lob_piece_tablet_id, Some(TabletId(2002)));
    assert!(record.hidden_tablet_ids.is_empty());
}

#[test]
fn s2_pure_hidden_create_is_dedup_on_retry() {
    let ls_id = LsId(1);
    let h = harness(ls_id);
    h.store.create_tablet(TabletMapKey::new(ls_id, TabletId(3000)));

    let arg = BatchCreateArg {
        tenant_id: TenantId(1),
        ls_id,
        schema_version: Version(1),
        table_schemas: vec![],
        entries: vec![CreateEntry {
            data_tablet_id: TabletId(3000),
            kind: CreateEntryKind::PureHidden {
                tablet_ids: vec![TabletId(3101), TabletId(3102)],
            },
        }],
    };

    let flags = TransFlags::new(TxId(1), LogTs(100), NotifyType::OnCommit);
    h.coordinator.create_tablet_bindings(&arg, &flags).unwrap();

    let record = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(3000))).unwrap();
    assert_eq!(record.hidden_tablet_ids, vec![TabletId(3101), TabletId(3102)]);

    // Re-issuing the same commit (a new transaction, same tablet ids) must
    // not duplicate the hidden list.
    let flags2 = TransFlags::new(TxId(2), LogTs(101), NotifyType::OnCommit);
    h.coordinator.create_tablet_bindings(&arg, &flags2).unwrap();
    let record = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(3000))).unwrap();
    assert_eq!(record.hidden_tablet_ids, vec![TabletId(3101), TabletId(3102)]);
}

fn s3_setup() -> (Harness, LsId) {
    let ls_id = LsId(1);
    let h = harness(ls_id);
    for id in [3000, 3101, 3102] {
        h.store.create_tablet(TabletMapKey::new(ls_id, TabletId(id)));
    }

    let arg = BatchUnbindArg {
        tenant_id: TenantId(1),
        ls_id,
        schema_version: Version(9),
        orig_tablet_ids: vec![TabletId(3000)],
        hidden_tablet_ids: vec![TabletId(3101), TabletId(3102)],
    };
    let flags = TransFlags::new(TxId(1), LogTs(100), NotifyType::OnCommit);
    h.coordinator
        .unbind_tablet_bindings(&arg, true, Version(777), &flags)
        .unwrap();
    (h, ls_id)
}

#[test]
fn s3_unbind_with_redefinition() {
    let (h, ls_id) = s3_setup();

    let orig = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(3000))).unwrap();
    assert!(orig.redefined);
    assert_eq!(orig.snapshot_version, Version(777));
    assert!(orig.hidden_tablet_ids.is_empty());

    for id in [3101, 3102] {
        let rec = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(id))).unwrap();
        assert!(!rec.redefined);
        assert_eq!(rec.snapshot_version, Version(777));
        assert_eq!(rec.schema_version, Version(9));
    }
}

#[test]
fn s4_read_path_after_s3() {
    let (h, ls_id) = s3_setup();

    let orig_key = TabletMapKey::new(ls_id, TabletId(3000));
    assert_eq!(
        h.coordinator.check_snapshot_readable(orig_key, Version(800)).unwrap_err(),
        CoordinatorError::SchemaRetry
    );
    assert!(h.coordinator.check_snapshot_readable(orig_key, Version(700)).is_ok());

    let hidden_key = TabletMapKey::new(ls_id, TabletId(3101));
    assert!(h.coordinator.check_snapshot_readable(hidden_key, Version(800)).is_ok());
    assert_eq!(
        h.coordinator.check_snapshot_readable(hidden_key, Version(700)).unwrap_err(),
        CoordinatorError::SnapshotDiscarded
    );
}

#[test]
fn s5_contended_lock_then_loser_retries_after_winner_commits() {
    let ls_id = LsId(1);
    let h = harness(ls_id);
    let key = TabletMapKey::new(ls_id, TabletId(4000));
    h.store.create_tablet(key);

    let t1 = TransFlags::new(TxId(1), LogTs(100), NotifyType::OnCommit);
    let t2 = TransFlags::new(TxId(2), LogTs(101), NotifyType::OnCommit);

    h.coordinator.lock(key, &t1).unwrap();
    let err = h.coordinator.lock(key, &t2).unwrap_err();
    assert_eq!(err, CoordinatorError::Retry);

    h.coordinator.unlock(key, &t1, false).unwrap();

    // Loser's retry now succeeds against the now-empty slot.
    h.coordinator.lock(key, &t2).unwrap();
    assert_eq!(h.store.tx_slot_of(key).unwrap().tx_id, TxId(2));
}

#[test]
fn s6_replay_idempotence() {
    let ls_id = LsId(1);
    let h = harness(ls_id);
    h.store.create_tablet(TabletMapKey::new(ls_id, TabletId(1001)));

    let arg = BatchCreateArg {
        tenant_id: TenantId(1),
        ls_id,
        schema_version: Version(9),
        table_schemas: vec![TableSchemaKind::AuxLobMeta, TableSchemaKind::AuxLobPiece],
        entries: vec![CreateEntry {
            data_tablet_id: TabletId(1001),
            kind: CreateEntryKind::PureAux {
                tablet_ids: vec![TabletId(2001), TabletId(2002)],
                table_schema_index: vec![0, 1],
            },
        }],
    };

    // Original forward commit: lock/set_log_ts/modify/unlock all at log ts
    // 100, leaving the tablet's `tx_log_ts` finalized at 100.
    let forward_flags = TransFlags::new(TxId(1), LogTs(100), NotifyType::OnCommit);
    h.coordinator.create_tablet_bindings(&arg, &forward_flags).unwrap();
    let record_before = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(1001))).unwrap();

    // A crash-recovery replay of the same transaction at the same log ts
    // must be a no-op: the resolver sees the tablet already frozen at
    // `tx_log_ts == 100` and every phase degrades to a benign skip.
    let mut replay_flags = forward_flags;
    replay_flags.for_replay = true;
    h.coordinator.create_tablet_bindings(&arg, &replay_flags).unwrap();
    let record_after = h.store.binding_of(TabletMapKey::new(ls_id, TabletId(1001))).unwrap();
    assert_eq!(record_before, record_after);
}
