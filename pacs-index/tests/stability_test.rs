//! Stability lifecycle: quiescence promotion, timer reset on touch,
//! capacity eviction, and deletion dropping tracker entries.

use std::sync::Arc;

use pacs_core::traits::test_helpers::{
    sample_summary, CollectingListener, ManualClock, MemoryStorageArea,
};
use pacs_core::traits::{ChangeListener, Clock, StorageArea};
use pacs_core::types::attachment::Attachment;
use pacs_core::types::enums::{AttachmentKind, ChangeKind, MetadataKind};
use pacs_core::IndexConfig;
use pacs_index::{ServerIndex, SqliteIndexDatabase, StoreRequest};

fn index_with(config: IndexConfig) -> (Arc<ManualClock>, ServerIndex) {
    let db = Box::new(SqliteIndexDatabase::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(1_000));
    let index = ServerIndex::new(
        db,
        Arc::new(MemoryStorageArea::new()) as Arc<dyn StorageArea>,
        vec![Arc::new(CollectingListener::new()) as Arc<dyn ChangeListener>],
        Arc::clone(&clock) as Arc<dyn Clock>,
        config,
    )
    .unwrap();
    (clock, index)
}

fn request(patient: &str, sop: &str) -> StoreRequest {
    StoreRequest::new(
        sample_summary(patient, "1.2.3", "1.2.3.4", sop),
        Attachment::uncompressed(AttachmentKind::Dicom, &format!("blob-{sop}"), 100, "0000"),
    )
}

#[test]
fn quiescent_resources_become_stable_children_first() {
    let (clock, index) = index_with(IndexConfig::default());

    let receipt = index.store(&request("PID1", "1.2.3.4.5")).unwrap();
    assert_eq!(index.unstable_resource_count(), 3);

    // Nothing promotes before the window has elapsed.
    clock.advance(59);
    assert_eq!(index.promote_quiescent_resources().unwrap(), 0);
    assert_eq!(index.unstable_resource_count(), 3);

    clock.advance(2);
    assert_eq!(index.promote_quiescent_resources().unwrap(), 3);
    assert_eq!(index.unstable_resource_count(), 0);

    let (changes, _) = index.changes(4, 100).unwrap();
    let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::StableSeries,
            ChangeKind::StableStudy,
            ChangeKind::StablePatient,
        ]
    );
    assert_eq!(changes[0].public_id, receipt.series_id);
    assert_eq!(changes[1].public_id, receipt.study_id);
    assert_eq!(changes[2].public_id, receipt.patient_id);
}

#[test]
fn any_write_side_touch_resets_the_quiescence_timer() {
    let (clock, index) = index_with(IndexConfig::default());

    index.store(&request("PID1", "1.2.3.4.5")).unwrap();
    clock.advance(30);
    // A second instance in the same series touches the whole chain.
    index.store(&request("PID1", "1.2.3.4.6")).unwrap();

    clock.advance(31);
    assert_eq!(index.promote_quiescent_resources().unwrap(), 0);

    clock.advance(30);
    assert_eq!(index.promote_quiescent_resources().unwrap(), 3);
}

#[test]
fn metadata_writes_make_a_stable_resource_unstable_again() {
    let (clock, index) = index_with(IndexConfig::default());

    let receipt = index.store(&request("PID1", "1.2.3.4.5")).unwrap();
    clock.advance(61);
    index.promote_quiescent_resources().unwrap();
    assert_eq!(index.unstable_resource_count(), 0);

    index
        .set_metadata(&receipt.series_id, MetadataKind::RemoteAet, "AET")
        .unwrap();
    assert_eq!(index.unstable_resource_count(), 3);

    clock.advance(61);
    assert_eq!(index.promote_quiescent_resources().unwrap(), 3);
}

#[test]
fn capacity_eviction_promotes_immediately() {
    let config = IndexConfig {
        stability_capacity: Some(2),
        ..IndexConfig::default()
    };
    let (_clock, index) = index_with(config);

    let receipt = index.store(&request("PID1", "1.2.3.4.5")).unwrap();
    // Marks arrive series, study, patient; capacity two evicts the
    // series, which is promoted on the spot.
    assert_eq!(index.unstable_resource_count(), 2);
    let last = index.last_change().unwrap().unwrap();
    assert_eq!(last.kind, ChangeKind::StableSeries);
    assert_eq!(last.public_id, receipt.series_id);
}

#[test]
fn deleting_a_resource_drops_its_tracker_entries() {
    let (clock, index) = index_with(IndexConfig::default());

    let receipt = index.store(&request("PID1", "1.2.3.4.5")).unwrap();
    assert_eq!(index.unstable_resource_count(), 3);

    index.delete_resource(&receipt.patient_id, None).unwrap();
    assert_eq!(index.unstable_resource_count(), 0);

    clock.advance(120);
    assert_eq!(index.promote_quiescent_resources().unwrap(), 0);
}
