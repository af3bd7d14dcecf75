//! Ledger Committer behaviour

mod common;

use common::Harness;
use chrono::Duration;
use outbox_artifact::{Artifact, ArtifactStore, CardId};
use outbox_ledger::{
    entry_folder, EntryEdit, ErrorKind, JournalFilter, LedgerError, SequenceNumber,
    SignatureManifest, MANIFEST_FILE,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn commit_places_artifact_signature_and_manifest() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"%PDF letter").await;

    let entry = h
        .committer
        .commit(h.request(&artifact, &number, b"%PDF letter"))
        .await
        .unwrap();

    assert_eq!(entry.sequence_number, number);
    assert_eq!(entry.folder_path, entry_folder(&number));
    assert_eq!(entry.artifact_ref.signer_name.as_deref(), Some("Test Signer"));
    assert_eq!(entry.artifact_ref.file_name, "1.pdf");

    let files = h.store.folder_files(&entry.folder_path).unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["1.pdf.sig", MANIFEST_FILE, "1.pdf"]);
    let manifest: SignatureManifest = serde_json::from_slice(&files[1].bytes).unwrap();
    assert_eq!(manifest.content_hash, artifact.content_hash);

    // staged copy is gone once the entry owns the bytes
    assert_eq!(h.store.staged_count(), 0);
    h.ledger.verify_integrity().unwrap();
}

#[tokio::test]
async fn committing_twice_yields_one_entry() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"body").await;
    let request = h.request(&artifact, &number, b"body");

    let first = h.committer.commit(request.clone()).await.unwrap();
    let second = h.committer.commit(request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.entry_count(), 1);
}

#[tokio::test]
async fn concurrent_commits_of_one_artifact_serialize() {
    let h = Arc::new(Harness::new());
    let (artifact, number) = h.prepared(2024, b"race").await;
    let request = h.request(&artifact, &number, b"race");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            let request = request.clone();
            tokio::spawn(async move { h.committer.commit(request).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.entry_count(), 1);
}

#[tokio::test]
async fn one_byte_difference_is_signature_invalid() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"exact bytes").await;

    let err = h
        .committer
        .commit(h.request(&artifact, &number, b"exact byteS"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
    assert!(err.is_integrity_fault());
    assert_eq!(h.entry_count(), 0);
    assert_eq!(h.store.folder_count(), 0);
}

#[tokio::test]
async fn unknown_credential_is_signature_invalid() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"doc").await;
    let mut request = h.request(&artifact, &number, b"doc");
    request.credential_thumbprint = outbox_ledger::Thumbprint::new("DEADBEEF");

    let err = h.committer.commit(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
}

#[tokio::test]
async fn number_held_by_another_entry_is_reused_fault() {
    let h = Harness::new();
    let (first, number) = h.prepared(2024, b"first").await;
    h.committer
        .commit(h.request(&first, &number, b"first"))
        .await
        .unwrap();

    // a second artifact bound to the same number
    let (second, _) = h.prepared(2024, b"second").await;
    h.allocator.bind(second.artifact_id, &number).unwrap();

    let err = h
        .committer
        .commit(h.request(&second, &number, b"second"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SequenceNumberReused { year: 2024, numeric: 1, .. }));
    assert_eq!(h.entry_count(), 1);
}

#[tokio::test]
async fn number_not_bound_to_artifact_is_rejected() {
    let h = Harness::new();
    let (artifact, _) = h.prepared(2024, b"doc").await;
    let never_allocated = SequenceNumber {
        numeric: 99,
        year: 2024,
        formatted: "99".into(),
    };

    let err = h
        .committer
        .commit(h.request(&artifact, &never_allocated, b"doc"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn unknown_artifact_is_not_found() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"doc").await;
    h.store.discard_staged(artifact.artifact_id).await.unwrap();

    let err = h
        .committer
        .commit(h.request(&artifact, &number, b"doc"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn storage_failure_removes_placed_folder() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"doc").await;

    h.backend.set_failing(true);
    let err = h
        .committer
        .commit(h.request(&artifact, &number, b"doc"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllocationUnavailable);
    assert_eq!(h.store.folder_count(), 0);
    assert_eq!(h.store.staged_count(), 1);

    // same payload succeeds once storage is back
    h.backend.set_failing(false);
    let entry = h
        .committer
        .commit(h.request(&artifact, &number, b"doc"))
        .await
        .unwrap();
    assert_eq!(entry.sequence_number.numeric, 1);
}

#[tokio::test]
async fn second_preparation_does_not_resurrect_first() {
    let h = Harness::new();
    let (first, first_number) = h.prepared(2024, b"render one").await;
    let (second, second_number) = h.prepared(2024, b"render two").await;
    assert_ne!(first.artifact_id, second.artifact_id);

    let entry = h
        .committer
        .commit(h.request(&second, &second_number, b"render two"))
        .await
        .unwrap();
    assert_eq!(entry.artifact_ref.artifact_id, second.artifact_id);
    assert_eq!(h.entry_count(), 1);

    // first render stays an uncommitted gap
    assert!(h.ledger.read(|s| s.entry_for_artifact(first.artifact_id).is_none()));
    assert!(h
        .ledger
        .read(|s| s.entry_for_sequence(2024, first_number.numeric).is_none()));
}

#[tokio::test]
async fn edit_then_query_keeps_sequence_number() {
    let h = Harness::new();
    let rule = outbox_ledger::NumberingRule::default();
    for _ in 0..6 {
        h.allocator.allocate(2024, &rule).unwrap();
    }
    let (artifact, number) = h.prepared(2024, b"seventh").await;
    assert_eq!(number.numeric, 7);

    let entry = h
        .committer
        .commit(h.request(&artifact, &number, b"seventh"))
        .await
        .unwrap();
    let edit = EntryEdit {
        to_whom: Some("Ministry".into()),
        ..EntryEdit::default()
    };
    h.committer.edit(entry.id, &edit).await.unwrap();

    let page = h
        .query
        .query(&JournalFilter::year(2024), 0, 100, None)
        .unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].to_whom, "Ministry");
    assert_eq!(page.entries[0].sequence_number, number);
    assert!(page.entries[0].updated_at.is_some());
}

#[tokio::test]
async fn delete_removes_entry_and_folder() {
    let h = Harness::new();
    let (artifact, number) = h.prepared(2024, b"doc").await;
    let entry = h
        .committer
        .commit(h.request(&artifact, &number, b"doc"))
        .await
        .unwrap();

    let removed = h.committer.delete(entry.id).await.unwrap();
    assert_eq!(removed.id, entry.id);
    assert_eq!(h.entry_count(), 0);
    assert!(h.store.folder_files(&entry.folder_path).is_none());
    assert_eq!(
        h.committer.delete(entry.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );

    // deleted numbers are not handed out again
    let (_, next) = h.prepared(2024, b"next").await;
    assert_eq!(next.numeric, 2);
    h.ledger.verify_integrity().unwrap();
}

#[tokio::test]
async fn edit_of_unknown_entry_is_not_found() {
    let h = Harness::new();
    let edit = EntryEdit {
        executor: Some("x".into()),
        ..EntryEdit::default()
    };
    let err = h.committer.edit(outbox_ledger::EntryId(42), &edit).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn delete_after_folder_relabel_spares_other_entries() {
    let h = Harness::new();
    let (a, a_number) = h.prepared(2024, b"doc a").await;
    let a_entry = h.committer.commit(h.request(&a, &a_number, b"doc a")).await.unwrap();
    let (b, b_number) = h.prepared(2024, b"doc b").await;
    let b_entry = h.committer.commit(h.request(&b, &b_number, b"doc b")).await.unwrap();

    let edit = EntryEdit {
        folder_path: Some(b_entry.folder_path.clone()),
        ..EntryEdit::default()
    };
    let relabelled = h.committer.edit(a_entry.id, &edit).await.unwrap();
    assert_eq!(relabelled.folder_path, b_entry.folder_path);
    assert_eq!(relabelled.storage_folder, a_entry.storage_folder);

    h.committer.delete(a_entry.id).await.unwrap();

    assert_eq!(h.store.folder_files(&b_entry.storage_folder).unwrap().len(), 3);
    assert!(h.store.folder_files(&a_entry.storage_folder).is_none());
    assert!(h.committer.entry(b_entry.id).is_some());
}

#[tokio::test]
async fn commit_locks_are_released_afterwards() {
    let h = Arc::new(Harness::new());
    let (artifact, number) = h.prepared(2024, b"once").await;
    let request = h.request(&artifact, &number, b"once");

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let h = h.clone();
            let request = request.clone();
            tokio::spawn(async move { h.committer.commit(request).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    h.committer
        .commit(h.request(&artifact, &number, b"tampered"))
        .await
        .unwrap();
    let (unknown, unknown_number) = h.prepared(2024, b"gone").await;
    h.store.discard_staged(unknown.artifact_id).await.unwrap();
    h.ledger
        .transact(|s| {
            s.reservations.remove(&unknown.artifact_id);
            Ok(())
        })
        .unwrap();
    assert!(h
        .committer
        .commit(h.request(&unknown, &unknown_number, b"gone"))
        .await
        .is_err());

    assert_eq!(h.committer.in_flight_count(), 0);
}

#[tokio::test]
async fn sweep_releases_abandoned_reservations_as_gaps() {
    let h = Harness::new();
    let (stale, stale_number) = h.prepared_ago(2024, b"stale", Duration::hours(48)).await;
    let (fresh, fresh_number) = h.prepared(2024, b"fresh").await;

    let report = h.committer.sweep_abandoned(Duration::hours(24)).await.unwrap();
    assert_eq!(report.reservations_released, 1);
    assert_eq!(report.staged_discarded, 1);
    assert_eq!(h.store.staged_count(), 1);
    assert!(h.ledger.read(|s| !s.reservations.contains_key(&stale.artifact_id)));
    assert_eq!(h.committer.in_flight_count(), 0);

    let err = h
        .committer
        .commit(h.request(&stale, &stale_number, b"stale"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // the released number stays allocated; the next one follows it
    assert!(h.ledger.read(|s| s.is_allocated(2024, stale_number.numeric)));
    let (_, next) = h.prepared(2024, b"next").await;
    assert_eq!(next.numeric, 3);

    h.committer
        .commit(h.request(&fresh, &fresh_number, b"fresh"))
        .await
        .unwrap();
}

#[tokio::test]
async fn sweep_discards_staged_copies_without_reservation() {
    let h = Harness::new();
    let mut orphan = Artifact::describe(CardId(2), "исх_b.docx", "b.pdf", "application/pdf", b"orphan");
    orphan.created_at -= Duration::hours(48);
    h.store.stage(&orphan, b"orphan").await.unwrap();
    let recent = Artifact::describe(CardId(2), "исх_c.docx", "c.pdf", "application/pdf", b"recent");
    h.store.stage(&recent, b"recent").await.unwrap();

    let report = h.committer.sweep_abandoned(Duration::hours(24)).await.unwrap();
    assert_eq!(report.reservations_released, 0);
    assert_eq!(report.staged_discarded, 1);
    assert!(h.store.describe(recent.artifact_id).await.is_ok());
    assert!(h.store.describe(orphan.artifact_id).await.is_err());

    assert_eq!(h.committer.sweep_abandoned(Duration::hours(24)).await.unwrap(), Default::default());
}
