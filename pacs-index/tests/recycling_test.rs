//! Quota enforcement: LRU victim selection, protected patients,
//! boundary behaviour at exact quota, and standalone recycling after
//! a quota reduction.

use std::sync::Arc;

use pacs_core::traits::test_helpers::{
    sample_summary, CollectingListener, ManualClock, MemoryStorageArea,
};
use pacs_core::traits::{ChangeListener, Clock, StorageArea};
use pacs_core::types::attachment::Attachment;
use pacs_core::types::enums::{AttachmentKind, ChangeKind, MetadataKind};
use pacs_core::{IndexConfig, IndexError};
use pacs_index::{ServerIndex, SqliteIndexDatabase, StoreRequest};

fn index_with(config: IndexConfig) -> ServerIndex {
    let db = Box::new(SqliteIndexDatabase::open_in_memory().unwrap());
    ServerIndex::new(
        db,
        Arc::new(MemoryStorageArea::new()) as Arc<dyn StorageArea>,
        vec![Arc::new(CollectingListener::new()) as Arc<dyn ChangeListener>],
        Arc::new(ManualClock::new(1_000)) as Arc<dyn Clock>,
        config,
    )
    .unwrap()
}

/// One 600-byte instance for a dedicated patient.
fn patient_request(patient: &str, size: u64) -> StoreRequest {
    StoreRequest::new(
        sample_summary(
            patient,
            &format!("1.2.{patient}"),
            &format!("1.2.{patient}.1"),
            &format!("1.2.{patient}.1.1"),
        ),
        Attachment::uncompressed(
            AttachmentKind::Dicom,
            &format!("blob-{patient}"),
            size,
            "0000",
        ),
    )
}

fn quota(bytes: u64) -> IndexConfig {
    IndexConfig {
        max_storage_bytes: Some(bytes),
        ..IndexConfig::default()
    }
}

#[test]
fn the_least_recently_used_patient_is_recycled_first() {
    let index = index_with(quota(2000));

    let a = index.store(&patient_request("A", 600)).unwrap();
    let b = index.store(&patient_request("B", 600)).unwrap();
    let c = index.store(&patient_request("C", 600)).unwrap();
    let before = index.last_change().unwrap().unwrap().seq;

    // A metadata read counts as an access and promotes B above A and C.
    index
        .lookup_metadata(&b.instance_id, MetadataKind::ReceptionDate)
        .unwrap();

    let d = index.store(&patient_request("D", 600)).unwrap();

    // A was the LRU victim; its whole subtree went away.
    assert!(matches!(
        index.lookup_resource(&a.patient_id),
        Err(IndexError::NotFound)
    ));
    assert!(index.lookup_resource(&b.patient_id).is_ok());
    assert!(index.lookup_resource(&c.patient_id).is_ok());
    assert!(index.lookup_resource(&d.patient_id).is_ok());

    let stats = index.global_statistics().unwrap();
    assert_eq!(stats.disk_size, 1800);
    assert_eq!(stats.patients, 3);

    // Deleted entries for A's subtree come in post-order, before the
    // New* events of D, all inside D's store.
    let (changes, _) = index.changes(before, 100).unwrap();
    let kinds: Vec<ChangeKind> = changes.iter().map(|ch| ch.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::Deleted,
            ChangeKind::Deleted,
            ChangeKind::Deleted,
            ChangeKind::Deleted,
            ChangeKind::NewPatient,
            ChangeKind::NewStudy,
            ChangeKind::NewSeries,
            ChangeKind::NewInstance,
        ]
    );
    assert_eq!(changes[0].public_id, a.instance_id);
    assert_eq!(changes[3].public_id, a.patient_id);
    assert_eq!(changes[4].public_id, d.patient_id);
}

#[test]
fn protected_patients_are_skipped_by_recycling() {
    let index = index_with(quota(2000));

    let a = index.store(&patient_request("A", 600)).unwrap();
    let b = index.store(&patient_request("B", 600)).unwrap();
    let c = index.store(&patient_request("C", 600)).unwrap();

    index.set_patient_protected(&a.patient_id, true).unwrap();
    assert!(index.is_protected_patient(&a.patient_id).unwrap());

    index
        .lookup_metadata(&b.instance_id, MetadataKind::ReceptionDate)
        .unwrap();
    index.store(&patient_request("D", 600)).unwrap();

    // A is LRU but protected; the next candidate C was recycled.
    assert!(index.lookup_resource(&a.patient_id).is_ok());
    assert!(matches!(
        index.lookup_resource(&c.patient_id),
        Err(IndexError::NotFound)
    ));
    assert_eq!(index.global_statistics().unwrap().patients, 3);
}

#[test]
fn store_at_exact_quota_does_not_recycle() {
    let index = index_with(quota(1800));

    index.store(&patient_request("A", 600)).unwrap();
    index.store(&patient_request("B", 600)).unwrap();
    index.store(&patient_request("C", 600)).unwrap();

    let stats = index.global_statistics().unwrap();
    assert_eq!(stats.disk_size, 1800);
    assert_eq!(stats.patients, 3);
    let (changes, _) = index.changes(0, 100).unwrap();
    assert!(changes.iter().all(|c| c.kind != ChangeKind::Deleted));
}

#[test]
fn full_storage_when_only_the_senders_patient_is_eligible() {
    let index = index_with(quota(1000));

    let first = index.store(&patient_request("A", 600)).unwrap();
    let seq = index.last_change().unwrap().unwrap().seq;

    // Same patient, second instance, one byte over quota in total.
    let mut second = patient_request("A", 600);
    second.summary = sample_summary("A", "1.2.A", "1.2.A.1", "1.2.A.1.2");
    let err = index.store(&second).unwrap_err();
    assert!(matches!(err, IndexError::FullStorage));

    // The store failed atomically: nothing changed.
    assert!(index.lookup_resource(&first.instance_id).is_ok());
    assert_eq!(index.global_statistics().unwrap().disk_size, 600);
    assert_eq!(index.last_change().unwrap().unwrap().seq, seq);
}

#[test]
fn patient_count_quota_only_recycles_for_new_patients() {
    let config = IndexConfig {
        max_patient_count: Some(2),
        ..IndexConfig::default()
    };
    let index = index_with(config);

    let a = index.store(&patient_request("A", 10)).unwrap();
    let b = index.store(&patient_request("B", 10)).unwrap();

    // A second instance for an existing patient fits without recycling.
    let mut more_b = patient_request("B", 10);
    more_b.summary = sample_summary("B", "1.2.B", "1.2.B.1", "1.2.B.1.2");
    more_b.attachments[0].uuid = "blob-B2".to_string();
    index.store(&more_b).unwrap();
    assert_eq!(index.global_statistics().unwrap().patients, 2);
    assert!(index.lookup_resource(&a.patient_id).is_ok());

    // A third patient forces the LRU one out.
    index.store(&patient_request("C", 10)).unwrap();
    let stats = index.global_statistics().unwrap();
    assert_eq!(stats.patients, 2);
    assert!(matches!(
        index.lookup_resource(&a.patient_id),
        Err(IndexError::NotFound)
    ));
    assert!(index.lookup_resource(&b.patient_id).is_ok());
}

#[test]
fn lowering_the_quota_recycles_standalone() {
    let index = index_with(IndexConfig::default());

    let a = index.store(&patient_request("A", 600)).unwrap();
    let b = index.store(&patient_request("B", 600)).unwrap();
    let c = index.store(&patient_request("C", 600)).unwrap();
    assert_eq!(index.global_statistics().unwrap().disk_size, 1800);

    index.set_max_storage_bytes(1000).unwrap();

    // A then B were recycled, oldest first, until under quota.
    assert!(matches!(
        index.lookup_resource(&a.patient_id),
        Err(IndexError::NotFound)
    ));
    assert!(matches!(
        index.lookup_resource(&b.patient_id),
        Err(IndexError::NotFound)
    ));
    assert!(index.lookup_resource(&c.patient_id).is_ok());
    assert_eq!(index.global_statistics().unwrap().disk_size, 600);
}

#[test]
fn add_attachment_enforces_the_quota_too() {
    let index = index_with(quota(1000));

    let a = index.store(&patient_request("A", 600)).unwrap();
    // The patient owning the target resource is never the victim, so
    // this attachment cannot be admitted.
    let big = Attachment::uncompressed(AttachmentKind::Preview, "blob-big", 500, "0000");
    let err = index.add_attachment(&a.instance_id, &big).unwrap_err();
    assert!(matches!(err, IndexError::FullStorage));

    // Another patient's data can be recycled to make room.
    let b = index.store(&patient_request("B", 300)).unwrap();
    index
        .lookup_metadata(&b.instance_id, MetadataKind::ReceptionDate)
        .unwrap();
    index.add_attachment(&b.instance_id, &big).unwrap();
    assert!(matches!(
        index.lookup_resource(&a.patient_id),
        Err(IndexError::NotFound)
    ));
    assert_eq!(index.global_statistics().unwrap().disk_size, 800);
}
