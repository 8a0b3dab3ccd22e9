//! In-memory doubles for the capability traits, shared by the test
//! suites of every crate in the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use super::clock::Clock;
use super::listener::ChangeListener;
use super::storage_area::StorageArea;
use crate::dicom::summary::DicomSummary;
use crate::dicom::tag::tags;
use crate::errors::IndexError;
use crate::types::change::Change;

/// Storage area backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStorageArea {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorageArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.blobs.lock().contains_key(uuid)
    }
}

impl StorageArea for MemoryStorageArea {
    fn create(&self, uuid: &str, content: &[u8]) -> Result<(), IndexError> {
        self.blobs.lock().insert(uuid.to_string(), content.to_vec());
        Ok(())
    }

    fn read(&self, uuid: &str) -> Result<Vec<u8>, IndexError> {
        self.blobs
            .lock()
            .get(uuid)
            .cloned()
            .ok_or(IndexError::NotFound)
    }

    fn remove(&self, uuid: &str) -> Result<(), IndexError> {
        self.blobs.lock().remove(uuid);
        Ok(())
    }
}

/// Listener that records every delivered change.
#[derive(Debug, Default)]
pub struct CollectingListener {
    changes: Mutex<Vec<Change>>,
    /// When true, `on_change` fails; used to verify that a broken
    /// observer is skipped without blocking the others.
    pub fail: std::sync::atomic::AtomicBool,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<Change> {
        self.changes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }
}

impl ChangeListener for CollectingListener {
    fn on_change(&self, change: &Change) -> Result<(), IndexError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IndexError::Internal {
                message: "listener configured to fail".to_string(),
            });
        }
        self.changes.lock().push(change.clone());
        Ok(())
    }
}

/// Hand-driven clock.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A minimal but complete summary for one instance.
pub fn sample_summary(patient: &str, study: &str, series: &str, sop: &str) -> DicomSummary {
    let mut summary = DicomSummary::new();
    summary
        .set(tags::PATIENT_ID, patient)
        .set(tags::PATIENT_NAME, format!("Doe^{patient}"))
        .set(tags::STUDY_INSTANCE_UID, study)
        .set(tags::STUDY_DESCRIPTION, "CHEST CT")
        .set(tags::SERIES_INSTANCE_UID, series)
        .set(tags::MODALITY, "CT")
        .set(tags::SOP_INSTANCE_UID, sop)
        .set(tags::INSTANCE_NUMBER, "1");
    summary
}
