//! Database wrapper traits.
//!
//! The wrapper exposes typed, side-effect-free operations over the
//! relational store. Every operation runs inside a caller-opened
//! transaction; the wrapper itself never starts one. Operations fall
//! into four groups: resource CRUD and lookup, main tags and
//! metadata, attachments and disk-size aggregation, and the
//! change/exported/global-property journals.
//!
//! Implementations surface errors as `NotFound`, `Conflict` (unique
//! constraint), `Busy` (transient contention), `Corrupt`
//! (schema/version mismatch) or `Io`.

use crate::dicom::tag::DicomTag;
use crate::errors::IndexError;
use crate::types::attachment::Attachment;
use crate::types::change::{Change, ExportedResource};
use crate::types::enums::{
    AttachmentKind, ChangeKind, GlobalProperty, MetadataKind, ResourceKind, TransactionKind,
};
use crate::types::identifiers::ResourceId;

/// Handle to the relational store. The index owns exactly one and
/// serializes access through its coarse lock; MVCC-style backends may
/// additionally provide their own serializability.
pub trait IndexDatabase: Send {
    /// Open a transaction of the requested kind.
    fn transaction<'a>(
        &'a mut self,
        kind: TransactionKind,
    ) -> Result<Box<dyn DatabaseTransaction + 'a>, IndexError>;

    /// Flush write-ahead state to durable storage.
    fn flush_to_disk(&mut self) -> Result<(), IndexError>;

    /// Version of the on-disk schema.
    fn schema_version(&mut self) -> Result<u32, IndexError>;
}

/// One atomic unit over the store. Dropped without `commit`, all
/// effects are rolled back.
pub trait DatabaseTransaction {
    fn commit(self: Box<Self>) -> Result<(), IndexError>;
    fn rollback(self: Box<Self>) -> Result<(), IndexError>;

    // ─── Resources ──────────────────────────────────────────────────

    /// Insert a resource row. `parent` is `None` only for patients.
    /// Fails with `Conflict` if the public id is already taken.
    fn create_resource(
        &mut self,
        public_id: &str,
        kind: ResourceKind,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId, IndexError>;

    /// Delete a single resource row together with its tags, metadata
    /// and attachment rows. Descendants are the hierarchy engine's
    /// responsibility.
    fn delete_resource(&mut self, id: ResourceId) -> Result<(), IndexError>;

    fn lookup_resource(
        &self,
        public_id: &str,
    ) -> Result<Option<(ResourceId, ResourceKind)>, IndexError>;

    fn resource_kind(&self, id: ResourceId) -> Result<ResourceKind, IndexError>;

    fn public_id(&self, id: ResourceId) -> Result<String, IndexError>;

    fn parent(&self, id: ResourceId) -> Result<Option<ResourceId>, IndexError>;

    /// Children in creation order.
    fn children(&self, id: ResourceId) -> Result<Vec<ResourceId>, IndexError>;

    fn count_resources(&self, kind: ResourceKind) -> Result<u64, IndexError>;

    fn all_public_ids(
        &self,
        kind: ResourceKind,
        since: usize,
        limit: usize,
    ) -> Result<Vec<String>, IndexError>;

    /// All patients in creation order; seeds the in-memory recycling
    /// order at startup.
    fn patients_by_creation(&self) -> Result<Vec<(ResourceId, String)>, IndexError>;

    fn is_protected_patient(&self, id: ResourceId) -> Result<bool, IndexError>;

    fn set_protected_patient(&mut self, id: ResourceId, protected: bool)
        -> Result<(), IndexError>;

    // ─── Main tags & metadata ───────────────────────────────────────

    fn set_main_tag(
        &mut self,
        id: ResourceId,
        tag: DicomTag,
        value: &str,
    ) -> Result<(), IndexError>;

    /// Record a pre-normalized identifier value for exact lookup.
    fn set_identifier_tag(
        &mut self,
        id: ResourceId,
        tag: DicomTag,
        value: &str,
    ) -> Result<(), IndexError>;

    fn main_tags(&self, id: ResourceId) -> Result<Vec<(DicomTag, String)>, IndexError>;

    fn lookup_identifier_exact(
        &self,
        kind: ResourceKind,
        tag: DicomTag,
        value: &str,
    ) -> Result<Vec<ResourceId>, IndexError>;

    fn set_metadata(
        &mut self,
        id: ResourceId,
        kind: MetadataKind,
        value: &str,
    ) -> Result<(), IndexError>;

    fn metadata(&self, id: ResourceId, kind: MetadataKind) -> Result<Option<String>, IndexError>;

    fn delete_metadata(&mut self, id: ResourceId, kind: MetadataKind) -> Result<(), IndexError>;

    fn all_metadata(&self, id: ResourceId) -> Result<Vec<(MetadataKind, String)>, IndexError>;

    // ─── Attachments ────────────────────────────────────────────────

    /// Fails with `Conflict` if the resource already has an
    /// attachment of the same content kind.
    fn add_attachment(&mut self, id: ResourceId, attachment: &Attachment)
        -> Result<(), IndexError>;

    fn attachment(
        &self,
        id: ResourceId,
        kind: AttachmentKind,
    ) -> Result<Option<Attachment>, IndexError>;

    /// Removes and returns the attachment row, so the caller can
    /// reclaim the blob after commit.
    fn delete_attachment(
        &mut self,
        id: ResourceId,
        kind: AttachmentKind,
    ) -> Result<Attachment, IndexError>;

    fn attachments(&self, id: ResourceId) -> Result<Vec<Attachment>, IndexError>;

    /// Sum of `compressed_size` over all attachment rows.
    fn total_compressed_size(&self) -> Result<u64, IndexError>;

    /// Sum of `uncompressed_size` over all attachment rows.
    fn total_uncompressed_size(&self) -> Result<u64, IndexError>;

    // ─── Journals & global properties ───────────────────────────────

    /// Append a change; the sequence number is allocated here, in
    /// commit order.
    fn log_change(
        &mut self,
        kind: ChangeKind,
        resource_kind: Option<ResourceKind>,
        public_id: &str,
        timestamp: i64,
    ) -> Result<Change, IndexError>;

    /// The next page of changes with sequence above `since`, plus a
    /// flag telling whether the journal has been read to its end.
    fn changes_since(&self, since: i64, limit: usize) -> Result<(Vec<Change>, bool), IndexError>;

    fn last_change(&self) -> Result<Option<Change>, IndexError>;

    /// Purge the journal and reset its sequence counter.
    fn clear_changes(&mut self) -> Result<(), IndexError>;

    /// Append to the exported-resources log; `entry.seq` is ignored
    /// and the stored record returned.
    fn log_exported(&mut self, entry: &ExportedResource) -> Result<ExportedResource, IndexError>;

    fn exported_since(
        &self,
        since: i64,
        limit: usize,
    ) -> Result<(Vec<ExportedResource>, bool), IndexError>;

    fn last_exported(&self) -> Result<Option<ExportedResource>, IndexError>;

    fn clear_exported(&mut self) -> Result<(), IndexError>;

    fn set_global_property(
        &mut self,
        property: GlobalProperty,
        value: &str,
    ) -> Result<(), IndexError>;

    fn global_property(&self, property: GlobalProperty) -> Result<Option<String>, IndexError>;
}
