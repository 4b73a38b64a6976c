use super::*;

fn pid(n: u128) -> ProductId {
    ProductId(Uuid::from_u128(n))
}

fn line(n: u128, name: &str, planned: i64) -> NewLine {
    NewLine {
        product_id: pid(n),
        product_name: name.to_string(),
        qty_planned: planned,
        stock_at_source: Some(20),
        stock_at_destination: Some(5),
        manually_added: false,
    }
}

async fn seed(storage: &Storage) -> (OutletId, OutletId, UserId) {
    let hub = storage.create_outlet("Hub Warehouse").await.expect("hub");
    let store = storage.create_outlet("High Street").await.expect("store");
    let user = storage.create_user("alice").await.expect("user");
    (hub, store, user)
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("temp root");
    let db_path = temp_root.path().join("nested").join("transfers.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn creates_and_reads_transfer_with_lines() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;

    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 6), line(2, "Mint 30ml", 3)])
        .await
        .expect("create");

    let transfer = storage
        .get_transfer(id)
        .await
        .expect("get")
        .expect("some transfer");
    assert_eq!(transfer.status, TransferStatus::Open);
    assert_eq!(transfer.source_outlet_id, hub);
    assert_eq!(transfer.destination_outlet_id, store);
    assert_eq!(transfer.created_by, user);
    assert_eq!(transfer.lines.len(), 2);
    assert_eq!(transfer.lines[0].product_id, pid(1));
    assert_eq!(transfer.lines[0].qty_planned, 6);
    assert!(transfer.packed_at.is_none());
}

#[tokio::test]
async fn zero_planned_lines_are_not_persisted() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;

    let mut manual = line(3, "Sample pack", 0);
    manual.manually_added = true;

    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 4), line(2, "Ghost", 0), manual])
        .await
        .expect("create");

    let transfer = storage.get_transfer(id).await.expect("get").expect("some");
    let ids: Vec<ProductId> = transfer.lines.iter().map(|l| l.product_id).collect();
    assert_eq!(ids, vec![pid(1), pid(3)]);
}

#[tokio::test]
async fn line_edits_rejected_after_leaving_open() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 2)])
        .await
        .expect("create");

    assert_eq!(
        storage.add_line(id, &line(2, "Mint 30ml", 1)).await.expect("add"),
        LineEdit::Applied
    );
    assert_eq!(
        storage.add_line(id, &line(2, "Mint 30ml", 1)).await.expect("add dup"),
        LineEdit::Duplicate
    );

    let commit = storage
        .commit_pack(
            id,
            user,
            &[(pid(1), 2), (pid(2), 1)],
            None,
            None,
            TransferStatus::Packed,
        )
        .await
        .expect("commit");
    assert!(matches!(commit, PackCommit::Applied { .. }));

    assert_eq!(
        storage.add_line(id, &line(4, "Late add", 1)).await.expect("add late"),
        LineEdit::NotOpen
    );
    assert_eq!(
        storage.remove_line(id, pid(1)).await.expect("remove late"),
        LineEdit::NotOpen
    );
}

#[tokio::test]
async fn pack_commit_applies_counts_and_drops_zero_counted() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(
            hub,
            store,
            user,
            &[line(1, "Berry 60ml", 6), line(2, "Mint 30ml", 3)],
        )
        .await
        .expect("create");

    let commit = storage
        .commit_pack(
            id,
            user,
            &[(pid(1), 5), (pid(2), 0)],
            Some("two boxes"),
            Some("NZP-0001"),
            TransferStatus::Packed,
        )
        .await
        .expect("commit");
    let PackCommit::Applied { removed_products } = commit else {
        panic!("expected applied commit");
    };
    assert_eq!(removed_products, vec![pid(2)]);

    let transfer = storage.get_transfer(id).await.expect("get").expect("some");
    assert_eq!(transfer.status, TransferStatus::Packed);
    assert_eq!(transfer.packed_by, Some(user));
    assert!(transfer.packed_at.is_some());
    assert_eq!(transfer.packing_notes.as_deref(), Some("two boxes"));
    assert_eq!(transfer.tracking_code.as_deref(), Some("NZP-0001"));
    assert_eq!(transfer.lines.len(), 1);
    assert_eq!(transfer.lines[0].qty_counted, Some(5));
}

#[tokio::test]
async fn pack_commit_rolls_back_when_counts_missing() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(
            hub,
            store,
            user,
            &[line(1, "Berry 60ml", 6), line(2, "Mint 30ml", 3)],
        )
        .await
        .expect("create");

    let commit = storage
        .commit_pack(id, user, &[(pid(1), 6)], None, None, TransferStatus::Packed)
        .await
        .expect("commit");
    let PackCommit::MissingCounts(missing) = commit else {
        panic!("expected missing counts");
    };
    assert_eq!(missing, vec![pid(2)]);

    let transfer = storage.get_transfer(id).await.expect("get").expect("some");
    assert_eq!(transfer.status, TransferStatus::Open);
    assert_eq!(transfer.lines[0].qty_counted, None);
}

#[tokio::test]
async fn second_pack_commit_loses_the_race() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 2)])
        .await
        .expect("create");

    let first = storage
        .commit_pack(id, user, &[(pid(1), 2)], None, None, TransferStatus::Packed)
        .await
        .expect("first commit");
    assert!(matches!(first, PackCommit::Applied { .. }));

    let second = storage
        .commit_pack(id, user, &[(pid(1), 9)], None, None, TransferStatus::Packed)
        .await
        .expect("second commit");
    assert!(matches!(second, PackCommit::NotOpen));

    // The losing call re-applied nothing.
    let transfer = storage.get_transfer(id).await.expect("get").expect("some");
    assert_eq!(transfer.lines[0].qty_counted, Some(2));
}

#[tokio::test]
async fn pack_commit_can_land_in_transit_directly() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 2)])
        .await
        .expect("create");

    let commit = storage
        .commit_pack(id, user, &[(pid(1), 2)], None, None, TransferStatus::InTransit)
        .await
        .expect("commit");
    assert!(matches!(commit, PackCommit::Applied { .. }));
    assert_eq!(
        storage.transfer_status(id).await.expect("status"),
        Some(TransferStatus::InTransit)
    );
}

#[tokio::test]
async fn dispatch_and_receive_round_out_the_lifecycle() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let receiver = storage.create_user("bob").await.expect("receiver");
    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 6)])
        .await
        .expect("create");

    storage
        .commit_pack(id, user, &[(pid(1), 6)], None, None, TransferStatus::Packed)
        .await
        .expect("commit");

    assert!(storage.dispatch(id, Some("GSS-77")).await.expect("dispatch"));
    assert!(!storage.dispatch(id, None).await.expect("re-dispatch"));

    let received = storage
        .commit_receive(id, receiver, &[(pid(1), 5)], Some("one damaged"))
        .await
        .expect("receive");
    assert!(matches!(received, ReceiveCommit::Applied));

    let transfer = storage.get_transfer(id).await.expect("get").expect("some");
    assert_eq!(transfer.status, TransferStatus::Received);
    assert_eq!(transfer.received_by, Some(receiver));
    assert_eq!(transfer.delivery_notes.as_deref(), Some("one damaged"));
    assert_eq!(transfer.tracking_code.as_deref(), Some("GSS-77"));
    assert_eq!(transfer.lines[0].qty_received_counted, Some(5));

    let again = storage
        .commit_receive(id, receiver, &[(pid(1), 5)], None)
        .await
        .expect("receive again");
    assert!(matches!(again, ReceiveCommit::NotInTransit));
}

#[tokio::test]
async fn receive_commit_requires_counts_for_sent_lines() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(
            hub,
            store,
            user,
            &[line(1, "Berry 60ml", 6), line(2, "Mint 30ml", 3)],
        )
        .await
        .expect("create");
    storage
        .commit_pack(
            id,
            user,
            &[(pid(1), 6), (pid(2), 3)],
            None,
            None,
            TransferStatus::InTransit,
        )
        .await
        .expect("commit");

    let received = storage
        .commit_receive(id, user, &[(pid(1), 6)], None)
        .await
        .expect("receive");
    let ReceiveCommit::MissingCounts(missing) = received else {
        panic!("expected missing receive counts");
    };
    assert_eq!(missing, vec![pid(2)]);
    assert_eq!(
        storage.transfer_status(id).await.expect("status"),
        Some(TransferStatus::InTransit)
    );
}

#[tokio::test]
async fn delete_is_valid_from_open_and_packed_only() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;

    let open = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 1)])
        .await
        .expect("create open");
    assert!(storage.delete_transfer(open).await.expect("delete open"));
    assert!(!storage.delete_transfer(open).await.expect("re-delete"));

    let shipped = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 1)])
        .await
        .expect("create shipped");
    storage
        .commit_pack(shipped, user, &[(pid(1), 1)], None, None, TransferStatus::InTransit)
        .await
        .expect("commit");
    assert!(!storage.delete_transfer(shipped).await.expect("delete in transit"));

    let deleted = storage.get_transfer(open).await.expect("get").expect("some");
    assert_eq!(deleted.status, TransferStatus::Deleted);
    assert_eq!(deleted.deleted_reason, Some(DeletedReason::Manual));
}

#[tokio::test]
async fn merge_candidates_filter_by_pair_and_status() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let elsewhere = storage.create_outlet("Beach Road").await.expect("outlet");

    let subject = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 1)])
        .await
        .expect("subject");
    let same_pair = storage
        .create_transfer(hub, store, user, &[line(2, "Mint 30ml", 2)])
        .await
        .expect("same pair");
    let other_pair = storage
        .create_transfer(hub, elsewhere, user, &[line(3, "Citrus 60ml", 2)])
        .await
        .expect("other pair");
    let packed = storage
        .create_transfer(hub, store, user, &[line(4, "Cola 30ml", 2)])
        .await
        .expect("packed");
    storage
        .commit_pack(packed, user, &[(pid(4), 2)], None, None, TransferStatus::Packed)
        .await
        .expect("commit");

    let candidates = storage
        .list_merge_candidates(hub, store, subject)
        .await
        .expect("candidates");
    let ids: Vec<TransferId> = candidates.iter().map(|c| c.transfer_id).collect();
    assert_eq!(ids, vec![same_pair]);
    assert!(!ids.contains(&other_pair));
    assert_eq!(candidates[0].destination_outlet_name, "High Street");
    assert_eq!(candidates[0].line_count, 1);
}

#[tokio::test]
async fn merge_sums_planned_quantities_and_retires_originals() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;

    let a = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 3)])
        .await
        .expect("a");
    let b = storage
        .create_transfer(
            hub,
            store,
            user,
            &[line(1, "Berry 60ml", 5), line(2, "Mint 30ml", 2)],
        )
        .await
        .expect("b");

    let MergeStore::Merged(merged_id) = storage
        .merge_transfers(a, b, user)
        .await
        .expect("merge")
    else {
        panic!("expected merged");
    };

    let merged = storage
        .get_transfer(merged_id)
        .await
        .expect("get")
        .expect("some");
    assert_eq!(merged.status, TransferStatus::Open);
    assert_eq!(merged.lines.len(), 2);
    let berry = merged
        .lines
        .iter()
        .find(|l| l.product_id == pid(1))
        .expect("berry line");
    assert_eq!(berry.qty_planned, 8);
    let mint = merged
        .lines
        .iter()
        .find(|l| l.product_id == pid(2))
        .expect("mint line");
    assert_eq!(mint.qty_planned, 2);

    for original in [a, b] {
        let retired = storage
            .get_transfer(original)
            .await
            .expect("get")
            .expect("some");
        assert_eq!(retired.status, TransferStatus::Deleted);
        assert_eq!(retired.deleted_reason, Some(DeletedReason::Merged));
        assert_eq!(retired.merged_into, Some(merged_id));
    }
}

#[tokio::test]
async fn merge_aborts_when_candidate_no_longer_open() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;

    let a = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 3)])
        .await
        .expect("a");
    let b = storage
        .create_transfer(hub, store, user, &[line(2, "Mint 30ml", 2)])
        .await
        .expect("b");
    storage
        .commit_pack(b, user, &[(pid(2), 2)], None, None, TransferStatus::Packed)
        .await
        .expect("commit b");

    let merge = storage.merge_transfers(a, b, user).await.expect("merge");
    assert!(matches!(merge, MergeStore::NotOpen(id) if id == b));

    // No partial effect: the subject is untouched.
    let subject = storage.get_transfer(a).await.expect("get").expect("some");
    assert_eq!(subject.status, TransferStatus::Open);
    assert_eq!(subject.merged_into, None);
}

#[tokio::test]
async fn merge_rejects_mismatched_outlet_pairs() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let elsewhere = storage.create_outlet("Beach Road").await.expect("outlet");

    let a = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 3)])
        .await
        .expect("a");
    let b = storage
        .create_transfer(hub, elsewhere, user, &[line(2, "Mint 30ml", 2)])
        .await
        .expect("b");

    let merge = storage.merge_transfers(a, b, user).await.expect("merge");
    assert!(matches!(merge, MergeStore::PairMismatch));
}

#[tokio::test]
async fn snapshot_refresh_keeps_existing_values() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (hub, store, user) = seed(&storage).await;
    let id = storage
        .create_transfer(hub, store, user, &[line(1, "Berry 60ml", 3)])
        .await
        .expect("create");

    storage
        .set_line_snapshots(id, pid(1), Some(42), None)
        .await
        .expect("snapshots");

    let transfer = storage.get_transfer(id).await.expect("get").expect("some");
    assert_eq!(transfer.lines[0].stock_at_source, Some(42));
    // None leaves the previous destination snapshot in place.
    assert_eq!(transfer.lines[0].stock_at_destination, Some(5));
}
