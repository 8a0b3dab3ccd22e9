//! Delete cascades: post-order change emission, childless-ancestor
//! pruning, protected-patient retention, and blob reclamation.

use std::sync::Arc;

use pacs_core::traits::test_helpers::{
    sample_summary, CollectingListener, ManualClock, MemoryStorageArea,
};
use pacs_core::traits::{ChangeListener, Clock, StorageArea};
use pacs_core::types::attachment::Attachment;
use pacs_core::types::enums::{AttachmentKind, ChangeKind, ResourceKind};
use pacs_core::{IndexConfig, IndexError};
use pacs_index::{ServerIndex, SqliteIndexDatabase, StoreRequest};

fn harness() -> (Arc<MemoryStorageArea>, ServerIndex) {
    let db = Box::new(SqliteIndexDatabase::open_in_memory().unwrap());
    let storage = Arc::new(MemoryStorageArea::new());
    let index = ServerIndex::new(
        db,
        Arc::clone(&storage) as Arc<dyn StorageArea>,
        vec![Arc::new(CollectingListener::new()) as Arc<dyn ChangeListener>],
        Arc::new(ManualClock::new(1_000)) as Arc<dyn Clock>,
        IndexConfig::default(),
    )
    .unwrap();
    (storage, index)
}

fn request(patient: &str, study: &str, series: &str, sop: &str, size: u64) -> StoreRequest {
    StoreRequest::new(
        sample_summary(patient, study, series, sop),
        Attachment::uncompressed(AttachmentKind::Dicom, &format!("blob-{sop}"), size, "0000"),
    )
}

#[test]
fn deleting_a_study_cascades_post_order_and_prunes_the_patient() {
    let (_storage, index) = harness();

    // One patient, one study, two series with one instance each.
    let r1 = index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.1", 10)).unwrap();
    let r2 = index.store(&request("PID1", "1.2.3", "1.2.3.2", "1.2.3.2.1", 10)).unwrap();
    let before = index.last_change().unwrap().unwrap().seq;

    let deleted = index
        .delete_resource(&r1.study_id, Some(ResourceKind::Study))
        .unwrap();
    assert_eq!(deleted.root_kind, ResourceKind::Study);
    assert_eq!(deleted.compressed_size, 20);
    assert!(deleted.remaining_ancestor.is_none());

    // Post-order inside the subtree, then the childless patient.
    let expected = vec![
        (ResourceKind::Instance, r1.instance_id.clone()),
        (ResourceKind::Series, r1.series_id.clone()),
        (ResourceKind::Instance, r2.instance_id.clone()),
        (ResourceKind::Series, r2.series_id.clone()),
        (ResourceKind::Study, r1.study_id.clone()),
        (ResourceKind::Patient, r1.patient_id.clone()),
    ];
    assert_eq!(deleted.deleted, expected);

    let (changes, _) = index.changes(before, 100).unwrap();
    assert_eq!(changes.len(), 6);
    for (change, (kind, public_id)) in changes.iter().zip(&expected) {
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert_eq!(change.resource_kind, Some(*kind));
        assert_eq!(&change.public_id, public_id);
    }

    let stats = index.global_statistics().unwrap();
    assert_eq!(stats.patients, 0);
    assert_eq!(stats.disk_size, 0);
}

#[test]
fn deleting_one_series_leaves_the_remaining_ancestor() {
    let (_storage, index) = harness();

    let r1 = index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.1", 10)).unwrap();
    let r2 = index.store(&request("PID1", "1.2.3", "1.2.3.2", "1.2.3.2.1", 10)).unwrap();

    let deleted = index.delete_resource(&r1.series_id, None).unwrap();
    assert_eq!(deleted.deleted.len(), 2);
    assert_eq!(
        deleted.remaining_ancestor,
        Some((ResourceKind::Study, r1.study_id.clone()))
    );

    assert!(index.lookup_resource(&r1.study_id).is_ok());
    assert!(index.lookup_resource(&r2.series_id).is_ok());
    assert!(matches!(
        index.lookup_resource(&r1.series_id),
        Err(IndexError::NotFound)
    ));
}

#[test]
fn a_childless_protected_patient_is_retained() {
    let (_storage, index) = harness();

    let r = index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.1", 10)).unwrap();
    index.set_patient_protected(&r.patient_id, true).unwrap();

    let deleted = index.delete_resource(&r.study_id, None).unwrap();
    assert_eq!(
        deleted.remaining_ancestor,
        Some((ResourceKind::Patient, r.patient_id.clone()))
    );

    let patient = index.lookup_resource(&r.patient_id).unwrap();
    assert_eq!(patient.kind, ResourceKind::Patient);
    assert!(index.children_of(&r.patient_id).unwrap().is_empty());

    // Unprotecting and deleting the last child removes it normally.
    index.set_patient_protected(&r.patient_id, false).unwrap();
    let deleted = index.delete_resource(&r.patient_id, None).unwrap();
    assert_eq!(deleted.deleted.len(), 1);
    assert!(matches!(
        index.lookup_resource(&r.patient_id),
        Err(IndexError::NotFound)
    ));
}

#[test]
fn deletion_reclaims_attachment_blobs_after_commit() {
    let (storage, index) = harness();
    storage.create("blob-1.2.3.1.1", b"pixels").unwrap();

    let r = index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.1", 10)).unwrap();
    assert!(storage.contains("blob-1.2.3.1.1"));

    index.delete_resource(&r.patient_id, None).unwrap();
    assert!(!storage.contains("blob-1.2.3.1.1"));
}

#[test]
fn deleting_an_unknown_or_mistyped_resource_is_not_found() {
    let (_storage, index) = harness();
    let r = index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.1", 10)).unwrap();

    assert!(matches!(
        index.delete_resource("no-such-resource", None),
        Err(IndexError::NotFound)
    ));
    // Kind mismatch behaves like absence.
    assert!(matches!(
        index.delete_resource(&r.series_id, Some(ResourceKind::Study)),
        Err(IndexError::NotFound)
    ));
    assert!(index.lookup_resource(&r.series_id).is_ok());
}

#[test]
fn resource_statistics_cover_the_subtree() {
    let (_storage, index) = harness();

    index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.1", 100)).unwrap();
    let r2 = index.store(&request("PID1", "1.2.3", "1.2.3.1", "1.2.3.1.2", 150)).unwrap();
    index.store(&request("PID1", "1.2.3", "1.2.3.2", "1.2.3.2.1", 200)).unwrap();

    let stats = index.resource_statistics(&r2.patient_id).unwrap();
    assert_eq!(stats.kind, ResourceKind::Patient);
    assert_eq!(stats.studies, 1);
    assert_eq!(stats.series, 2);
    assert_eq!(stats.instances, 3);
    assert_eq!(stats.disk_size, 450);

    let stats = index.resource_statistics(&r2.series_id).unwrap();
    assert_eq!(stats.kind, ResourceKind::Series);
    assert_eq!(stats.studies, 0);
    assert_eq!(stats.series, 0);
    assert_eq!(stats.instances, 2);
    assert_eq!(stats.disk_size, 250);
}
