//! Change journal and exported-resource records.

use serde::{Deserialize, Serialize};

use super::enums::{ChangeKind, ResourceKind};

/// One entry of the change journal.
///
/// Sequence numbers are allocated by the database wrapper in commit
/// order; within a single run they are strictly increasing and
/// gap-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub seq: i64,
    pub kind: ChangeKind,
    /// `None` for system-wide kinds (`UpdatedPeers`,
    /// `UpdatedModalities`) that are not tied to a resource.
    pub resource_kind: Option<ResourceKind>,
    pub public_id: String,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
}

/// One entry of the exported-resources log, recording an outbound
/// transfer together with the DICOM identifier tuple of the resource
/// at export time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedResource {
    pub seq: i64,
    pub resource_kind: ResourceKind,
    pub public_id: String,
    /// AET of the remote modality or peer the resource was sent to.
    pub modality: String,
    pub patient_id: String,
    pub study_uid: String,
    pub series_uid: String,
    pub sop_uid: String,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
}
