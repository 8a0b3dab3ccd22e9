//! Restart behaviour: a file-backed store survives a stop/reopen
//! cycle, and the recycling order reseeds from creation order.

use std::path::Path;
use std::sync::Arc;

use pacs_core::traits::test_helpers::{
    sample_summary, CollectingListener, ManualClock, MemoryStorageArea,
};
use pacs_core::traits::{ChangeListener, Clock, StorageArea};
use pacs_core::types::attachment::Attachment;
use pacs_core::types::enums::AttachmentKind;
use pacs_core::{IndexConfig, IndexError};
use pacs_index::{ServerIndex, SqliteIndexDatabase, StoreRequest};
use tempfile::TempDir;

fn open(path: &Path, config: IndexConfig) -> ServerIndex {
    let db = Box::new(SqliteIndexDatabase::open(path).unwrap());
    ServerIndex::new(
        db,
        Arc::new(MemoryStorageArea::new()) as Arc<dyn StorageArea>,
        vec![Arc::new(CollectingListener::new()) as Arc<dyn ChangeListener>],
        Arc::new(ManualClock::new(1_000)) as Arc<dyn Clock>,
        config,
    )
    .unwrap()
}

fn request(patient: &str, size: u64) -> StoreRequest {
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

#[test]
fn a_reopened_store_keeps_resources_and_journal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");

    let patient_id;
    {
        let index = open(&path, IndexConfig::default());
        let receipt = index.store(&request("PID1", 256)).unwrap();
        patient_id = receipt.patient_id.clone();
        index.stop();
    }

    let index = open(&path, IndexConfig::default());
    assert!(index.lookup_resource(&patient_id).is_ok());
    assert_eq!(index.global_statistics().unwrap().disk_size, 256);

    // The change sequence continues where it left off.
    assert_eq!(index.last_change().unwrap().unwrap().seq, 4);
    index.store(&request("PID2", 256)).unwrap();
    assert_eq!(index.last_change().unwrap().unwrap().seq, 8);
}

#[test]
fn recycling_order_reseeds_from_creation_order_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");

    let (a, b);
    {
        let index = open(&path, IndexConfig::default());
        a = index.store(&request("A", 600)).unwrap().patient_id;
        b = index.store(&request("B", 600)).unwrap().patient_id;
        index.stop();
    }

    let config = IndexConfig {
        max_storage_bytes: Some(1500),
        ..IndexConfig::default()
    };
    let index = open(&path, config);
    // C needs room; the oldest patient by creation order goes first.
    index.store(&request("C", 600)).unwrap();

    assert!(matches!(
        index.lookup_resource(&a),
        Err(IndexError::NotFound)
    ));
    assert!(index.lookup_resource(&b).is_ok());
    assert_eq!(index.global_statistics().unwrap().disk_size, 1200);
}
