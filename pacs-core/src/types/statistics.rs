//! Operation results and aggregate statistics.

use serde::{Deserialize, Serialize};

use super::enums::ResourceKind;

/// Outcome of a `store` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The instance was written.
    Created,
    /// The instance was already present and `overwrite` was false.
    AlreadyStored,
}

/// Receipt returned by a successful `store` call.
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    pub outcome: StoreOutcome,
    pub patient_id: String,
    pub study_id: String,
    pub series_id: String,
    pub instance_id: String,
    /// Levels freshly created by this call, parent before child.
    pub created: Vec<(ResourceKind, String)>,
}

/// Description of a deleted subtree, returned by `delete_resource`.
#[derive(Debug, Clone)]
pub struct DeletedSubtree {
    pub root_kind: ResourceKind,
    /// Every deleted resource, in post-order (child before parent).
    pub deleted: Vec<(ResourceKind, String)>,
    /// Total compressed size of the removed attachments.
    pub compressed_size: u64,
    /// Total uncompressed size of the removed attachments.
    pub uncompressed_size: u64,
    /// Closest surviving ancestor, if the cascade stopped below the
    /// top of the tree.
    pub remaining_ancestor: Option<(ResourceKind, String)>,
}

/// Store-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    pub disk_size: u64,
    pub uncompressed_size: u64,
    pub patients: u64,
    pub studies: u64,
    pub series: u64,
    pub instances: u64,
}

/// Totals of a single resource's subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatistics {
    pub kind: ResourceKind,
    pub disk_size: u64,
    pub uncompressed_size: u64,
    /// Descendant counts; levels at or above `kind` are zero.
    pub studies: u64,
    pub series: u64,
    pub instances: u64,
}
