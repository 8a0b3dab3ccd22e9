//! The server index facade.
//!
//! One coarse mutex guards the database handle and the in-memory
//! caches (stability tracker, recycling order, tag registry). Every
//! public API acquires it, runs a typed transaction with retry, and
//! applies the buffered cache effects only after the commit. Listener
//! delivery and blob reclamation happen strictly after the lock is
//! released.

mod recycling;
mod stability;
mod store;
mod transaction;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pacs_core::dicom::registry::normalize_identifier;
use pacs_core::dicom::tag::{tags, DicomTag};
use pacs_core::traits::clock::Clock;
use pacs_core::traits::database::{DatabaseTransaction, IndexDatabase};
use pacs_core::traits::listener::ChangeListener;
use pacs_core::traits::storage_area::StorageArea;
use pacs_core::types::attachment::Attachment;
use pacs_core::types::change::{Change, ExportedResource};
use pacs_core::types::enums::{
    AttachmentKind, ChangeKind, GlobalProperty, MetadataKind, ResourceKind,
};
use pacs_core::types::identifiers::ResourceId;
use pacs_core::types::origin::InstanceOrigin;
use pacs_core::types::statistics::{DeletedSubtree, GlobalStatistics, ResourceStatistics, StoreReceipt};
use pacs_core::{DicomSummary, IndexConfig, IndexError, MainTagRegistry};

use crate::bridge::ChangeBridge;
use crate::housekeeping::HousekeepingThreads;
use recycling::{recycle_for_admission, standalone_recycle, RecyclingOrder};
use stability::{StabilityTracker, UnstablePayload};
use transaction::{
    containing_patient, run_read_only, run_read_write, RoTx, RwTx, SubtreeStats,
    TransactionContext,
};

/// Ingestion request for one DICOM instance.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Parsed tag/value map of the instance.
    pub summary: DicomSummary,
    /// Attachment rows to record; must include the DICOM blob.
    pub attachments: Vec<Attachment>,
    /// Caller-supplied metadata, applied per level. Ancestor entries
    /// only take effect when this call creates the ancestor.
    pub metadata: Vec<(ResourceKind, MetadataKind, String)>,
    pub origin: InstanceOrigin,
    pub transfer_syntax: Option<String>,
    pub sop_class_uid: Option<String>,
    /// Replace an already-stored instance instead of reporting
    /// `AlreadyStored`.
    pub overwrite: bool,
}

impl StoreRequest {
    pub fn new(summary: DicomSummary, dicom: Attachment) -> Self {
        Self {
            summary,
            attachments: vec![dicom],
            metadata: Vec::new(),
            origin: InstanceOrigin::Unknown,
            transfer_syntax: None,
            sop_class_uid: None,
            overwrite: false,
        }
    }
}

/// Snapshot of one resource, as returned by [`ServerIndex::lookup_resource`].
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub public_id: String,
    pub kind: ResourceKind,
    pub parent: Option<String>,
    pub main_tags: Vec<(DicomTag, String)>,
}

/// State behind the coarse index lock.
pub(crate) struct IndexInner {
    pub(crate) db: Box<dyn IndexDatabase>,
    pub(crate) registry: MainTagRegistry,
    pub(crate) stability: StabilityTracker,
    pub(crate) recycling: RecyclingOrder,
    pub(crate) config: IndexConfig,
    /// Set after a `Corrupt` error; all further writes are refused.
    pub(crate) degraded: bool,
    pub(crate) write_generation: u64,
    pub(crate) flushed_generation: u64,
}

/// Shared read-only environment handed to write operations.
pub(crate) struct WriteEnv<'a> {
    pub registry: &'a MainTagRegistry,
    pub recycling: &'a RecyclingOrder,
    pub max_storage_bytes: u64,
    pub max_patient_count: u64,
}

/// The server index.
pub struct ServerIndex {
    inner: Arc<Mutex<IndexInner>>,
    bridge: ChangeBridge,
    storage: Arc<dyn StorageArea>,
    clock: Arc<dyn Clock>,
    shutdown: AtomicBool,
    threads: Mutex<Option<HousekeepingThreads>>,
}

impl ServerIndex {
    /// Build the index over an opened database wrapper, start the
    /// listener bridge and the housekeeping threads.
    pub fn new(
        mut db: Box<dyn IndexDatabase>,
        storage: Arc<dyn StorageArea>,
        listeners: Vec<Arc<dyn ChangeListener>>,
        clock: Arc<dyn Clock>,
        config: IndexConfig,
    ) -> Result<Self, IndexError> {
        let max_retries = config.effective_max_retries();
        let (overrides, patients) = run_read_only(&mut db, max_retries, None, |ro| {
            Ok((
                ro.db.global_property(GlobalProperty::MainTagOverrides)?,
                ro.db.patients_by_creation()?,
            ))
        })?;

        let mut registry = MainTagRegistry::with_defaults();
        if let Some(json) = overrides {
            registry.apply_overrides_json(&json)?;
        }

        let mut recycling = RecyclingOrder::new();
        let patient_count = patients.len();
        recycling.seed(patients);
        tracing::info!(patients = patient_count, "server index opened");

        let stability = StabilityTracker::new(config.effective_stability_capacity());
        let flush_interval = Duration::from_secs(config.effective_flush_interval_secs().max(1));

        let inner = Arc::new(Mutex::new(IndexInner {
            db,
            registry,
            stability,
            recycling,
            config,
            degraded: false,
            write_generation: 0,
            flushed_generation: 0,
        }));

        let bridge = ChangeBridge::spawn(listeners);
        let threads = HousekeepingThreads::spawn(
            Arc::clone(&inner),
            Arc::clone(&clock),
            bridge.sender(),
            flush_interval,
        );

        Ok(Self {
            inner,
            bridge,
            storage,
            clock,
            shutdown: AtomicBool::new(false),
            threads: Mutex::new(Some(threads)),
        })
    }

    /// Cooperative shutdown: in-flight operations complete, new ones
    /// fail with `Shutdown`, housekeeping and delivery threads join.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut threads) = self.threads.lock().take() {
            threads.stop();
        }
        self.bridge.shutdown();
        tracing::info!("server index stopped");
    }

    fn ensure_running(&self) -> Result<(), IndexError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(IndexError::Shutdown);
        }
        Ok(())
    }

    // ─── Transaction plumbing ───────────────────────────────────────

    fn with_write<T>(
        &self,
        mut f: impl FnMut(&mut RwTx<'_, '_>, &WriteEnv<'_>) -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        self.ensure_running()?;

        let (value, changes, files) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.degraded {
                return Err(IndexError::Corrupt {
                    details: "index is in read-only degraded mode".to_string(),
                });
            }

            let now = self.clock.unix_seconds();
            let max_retries = inner.config.effective_max_retries();
            let IndexInner {
                db,
                registry,
                stability,
                recycling,
                config,
                degraded,
                write_generation,
                ..
            } = inner;

            let result = {
                let env = WriteEnv {
                    registry: &*registry,
                    recycling: &*recycling,
                    max_storage_bytes: config.effective_max_storage_bytes(),
                    max_patient_count: config.effective_max_patient_count(),
                };
                run_read_write(db, max_retries, None, now, |rw| f(rw, &env))
            };

            match result {
                Ok((value, ctx)) => {
                    *write_generation += 1;
                    let TransactionContext {
                        mut changes,
                        files_to_remove,
                        touched_unstable,
                        deleted_resources,
                        deleted_patients,
                        new_patients,
                        touched_patients,
                    } = ctx;

                    for id in &deleted_resources {
                        stability.remove(*id);
                    }
                    for id in &deleted_patients {
                        recycling.remove(*id);
                    }
                    for (id, public_id) in &new_patients {
                        recycling.insert(*id, public_id);
                    }
                    for id in &touched_patients {
                        recycling.touch(*id);
                    }

                    let mut evicted = Vec::new();
                    for (id, kind, public_id) in &touched_unstable {
                        if let Some(promotion) =
                            stability.mark_unstable(*id, *kind, public_id, now)
                        {
                            evicted.push(promotion);
                        }
                    }
                    if !evicted.is_empty() {
                        match log_stable_changes(db, max_retries, now, &evicted) {
                            Ok(mut extra) => {
                                *write_generation += 1;
                                changes.append(&mut extra);
                            }
                            Err(e) => tracing::warn!(
                                error = %e,
                                "failed to journal capacity-eviction promotions"
                            ),
                        }
                    }

                    (value, changes, files_to_remove)
                }
                Err(e) => {
                    if e.is_fatal() {
                        *degraded = true;
                        tracing::error!(error = %e, "entering read-only degraded mode");
                    }
                    return Err(e);
                }
            }
        };

        self.bridge.deliver(changes);
        for uuid in files {
            if let Err(e) = self.storage.remove(&uuid) {
                tracing::warn!(uuid = %uuid, error = %e, "failed to reclaim attachment blob");
            }
        }
        Ok(value)
    }

    /// The closure returns the value plus the patients it accessed;
    /// those are promoted in the recycling order afterwards.
    fn with_read<T>(
        &self,
        mut f: impl FnMut(&RoTx<'_, '_>) -> Result<(T, Vec<ResourceId>), IndexError>,
    ) -> Result<T, IndexError> {
        self.ensure_running()?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let max_retries = inner.config.effective_max_retries();
        let IndexInner {
            db,
            recycling,
            degraded,
            ..
        } = inner;

        match run_read_only(db, max_retries, None, |ro| f(ro)) {
            Ok((value, touched)) => {
                for id in touched {
                    recycling.touch(id);
                }
                Ok(value)
            }
            Err(e) => {
                if e.is_fatal() {
                    *degraded = true;
                    tracing::error!(error = %e, "entering read-only degraded mode");
                }
                Err(e)
            }
        }
    }

    // ─── Ingestion & deletion ───────────────────────────────────────

    /// Store one instance. See [`StoreRequest`].
    pub fn store(&self, request: &StoreRequest) -> Result<StoreReceipt, IndexError> {
        self.with_write(|rw, env| store::store_instance(rw, env, request))
    }

    /// Cascade-delete the resource named by `public_id`, pruning
    /// childless ancestors up to (but excluding) protected patients.
    pub fn delete_resource(
        &self,
        public_id: &str,
        expected_kind: Option<ResourceKind>,
    ) -> Result<DeletedSubtree, IndexError> {
        self.with_write(|rw, _env| {
            let (id, kind) = rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            if let Some(expected) = expected_kind {
                if kind != expected {
                    return Err(IndexError::NotFound);
                }
            }

            let patient = containing_patient(&*rw.db, id)?;
            let parent = rw.db.parent(id)?;
            let mut stats = SubtreeStats::default();
            rw.delete_subtree(id, &mut stats)?;

            // Prune childless ancestors, retaining protected patients.
            let mut current = parent;
            let mut remaining = None;
            while let Some(ancestor) = current {
                let ancestor_kind = rw.db.resource_kind(ancestor)?;
                if !rw.db.children(ancestor)?.is_empty() {
                    remaining = Some((ancestor_kind, rw.db.public_id(ancestor)?));
                    rw.mark_unstable_chain(ancestor)?;
                    break;
                }
                if ancestor_kind == ResourceKind::Patient
                    && rw.db.is_protected_patient(ancestor)?
                {
                    remaining = Some((ancestor_kind, rw.db.public_id(ancestor)?));
                    rw.mark_unstable_chain(ancestor)?;
                    break;
                }
                let next = rw.db.parent(ancestor)?;
                rw.delete_subtree(ancestor, &mut stats)?;
                current = next;
            }

            if !rw.ctx.deleted_patients.contains(&patient) {
                rw.ctx.touched_patients.push(patient);
            }

            Ok(DeletedSubtree {
                root_kind: kind,
                deleted: std::mem::take(&mut stats.deleted),
                compressed_size: stats.compressed_size,
                uncompressed_size: stats.uncompressed_size,
                remaining_ancestor: remaining,
            })
        })
    }

    // ─── Navigation ─────────────────────────────────────────────────

    pub fn lookup_resource(&self, public_id: &str) -> Result<ResourceInfo, IndexError> {
        self.with_read(|ro| {
            let (id, kind) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let parent = match ro.db.parent(id)? {
                Some(parent) => Some(ro.db.public_id(parent)?),
                None => None,
            };
            let info = ResourceInfo {
                public_id: public_id.to_string(),
                kind,
                parent,
                main_tags: ro.db.main_tags(id)?,
            };
            let patient = containing_patient(ro.db, id)?;
            Ok((info, vec![patient]))
        })
    }

    /// Public ids of the direct children, in creation order.
    pub fn children_of(&self, public_id: &str) -> Result<Vec<String>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let mut result = Vec::new();
            for child in ro.db.children(id)? {
                result.push(ro.db.public_id(child)?);
            }
            let patient = containing_patient(ro.db, id)?;
            Ok((result, vec![patient]))
        })
    }

    /// Public ids of every instance below the resource.
    pub fn child_instances_of(&self, public_id: &str) -> Result<Vec<String>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let mut result = Vec::new();
            let mut queue = vec![id];
            while let Some(current) = queue.pop() {
                if ro.db.resource_kind(current)? == ResourceKind::Instance {
                    result.push(ro.db.public_id(current)?);
                } else {
                    queue.extend(ro.db.children(current)?);
                }
            }
            result.sort();
            let patient = containing_patient(ro.db, id)?;
            Ok((result, vec![patient]))
        })
    }

    /// Public id of the parent; `None` for patients.
    pub fn lookup_parent(&self, public_id: &str) -> Result<Option<String>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let parent = match ro.db.parent(id)? {
                Some(parent) => Some(ro.db.public_id(parent)?),
                None => None,
            };
            let patient = containing_patient(ro.db, id)?;
            Ok((parent, vec![patient]))
        })
    }

    /// Page through all public ids of one kind, in creation order.
    pub fn all_public_ids(
        &self,
        kind: ResourceKind,
        since: usize,
        limit: usize,
    ) -> Result<Vec<String>, IndexError> {
        self.with_read(|ro| Ok((ro.db.all_public_ids(kind, since, limit)?, Vec::new())))
    }

    /// Exact identifier-tag search; the value is normalized the same
    /// way stored identifiers are.
    pub fn find_by_identifier(
        &self,
        kind: ResourceKind,
        tag: DicomTag,
        value: &str,
    ) -> Result<Vec<String>, IndexError> {
        self.with_read(|ro| {
            let ids = ro
                .db
                .lookup_identifier_exact(kind, tag, &normalize_identifier(value))?;
            let mut result = Vec::new();
            for id in ids {
                result.push(ro.db.public_id(id)?);
            }
            Ok((result, Vec::new()))
        })
    }

    // ─── Metadata ───────────────────────────────────────────────────

    pub fn set_metadata(
        &self,
        public_id: &str,
        kind: MetadataKind,
        value: &str,
    ) -> Result<(), IndexError> {
        self.with_write(|rw, _env| {
            let (id, resource_kind) =
                rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            rw.db.set_metadata(id, kind, value)?;
            rw.log_change(ChangeKind::UpdatedMetadata, Some(resource_kind), public_id)?;
            rw.mark_unstable_chain(id)?;
            let patient = containing_patient(&*rw.db, id)?;
            rw.ctx.touched_patients.push(patient);
            Ok(())
        })
    }

    pub fn lookup_metadata(
        &self,
        public_id: &str,
        kind: MetadataKind,
    ) -> Result<Option<String>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let value = ro.db.metadata(id, kind)?;
            let patient = containing_patient(ro.db, id)?;
            Ok((value, vec![patient]))
        })
    }

    pub fn delete_metadata(&self, public_id: &str, kind: MetadataKind) -> Result<(), IndexError> {
        self.with_write(|rw, _env| {
            let (id, resource_kind) =
                rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            rw.db.delete_metadata(id, kind)?;
            rw.log_change(ChangeKind::UpdatedMetadata, Some(resource_kind), public_id)?;
            rw.mark_unstable_chain(id)?;
            let patient = containing_patient(&*rw.db, id)?;
            rw.ctx.touched_patients.push(patient);
            Ok(())
        })
    }

    pub fn all_metadata(
        &self,
        public_id: &str,
    ) -> Result<Vec<(MetadataKind, String)>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let metadata = ro.db.all_metadata(id)?;
            let patient = containing_patient(ro.db, id)?;
            Ok((metadata, vec![patient]))
        })
    }

    // ─── Attachments ────────────────────────────────────────────────

    /// Record an attachment on an existing resource, enforcing the
    /// storage quota the same way ingestion does.
    pub fn add_attachment(
        &self,
        public_id: &str,
        attachment: &Attachment,
    ) -> Result<(), IndexError> {
        self.with_write(|rw, env| {
            let (id, resource_kind) =
                rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let patient = containing_patient(&*rw.db, id)?;
            let patient_public_id = rw.db.public_id(patient)?;
            recycle_for_admission(
                rw,
                env.recycling,
                env.max_storage_bytes,
                env.max_patient_count,
                attachment.compressed_size,
                &patient_public_id,
            )?;
            rw.db.add_attachment(id, attachment)?;
            rw.log_change(ChangeKind::UpdatedAttachment, Some(resource_kind), public_id)?;
            rw.mark_unstable_chain(id)?;
            rw.ctx.touched_patients.push(patient);
            Ok(())
        })
    }

    pub fn lookup_attachment(
        &self,
        public_id: &str,
        kind: AttachmentKind,
    ) -> Result<Option<Attachment>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let attachment = ro.db.attachment(id, kind)?;
            let patient = containing_patient(ro.db, id)?;
            Ok((attachment, vec![patient]))
        })
    }

    /// Delete an attachment row; the blob is reclaimed from the
    /// storage area after commit.
    pub fn delete_attachment(
        &self,
        public_id: &str,
        kind: AttachmentKind,
    ) -> Result<(), IndexError> {
        self.with_write(|rw, _env| {
            let (id, resource_kind) =
                rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let attachment = rw.db.delete_attachment(id, kind)?;
            rw.ctx.files_to_remove.push(attachment.uuid);
            rw.log_change(ChangeKind::UpdatedAttachment, Some(resource_kind), public_id)?;
            rw.mark_unstable_chain(id)?;
            let patient = containing_patient(&*rw.db, id)?;
            rw.ctx.touched_patients.push(patient);
            Ok(())
        })
    }

    pub fn list_attachments(&self, public_id: &str) -> Result<Vec<Attachment>, IndexError> {
        self.with_read(|ro| {
            let (id, _) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let attachments = ro.db.attachments(id)?;
            let patient = containing_patient(ro.db, id)?;
            Ok((attachments, vec![patient]))
        })
    }

    // ─── Patient protection ─────────────────────────────────────────

    pub fn is_protected_patient(&self, public_id: &str) -> Result<bool, IndexError> {
        self.with_read(|ro| {
            let (id, kind) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            if kind != ResourceKind::Patient {
                return Err(IndexError::BadRequest {
                    message: format!("{public_id} is a {}, not a patient", kind.as_str()),
                });
            }
            Ok((ro.db.is_protected_patient(id)?, vec![id]))
        })
    }

    /// A protected patient is never chosen as a recycling victim.
    pub fn set_patient_protected(
        &self,
        public_id: &str,
        protected: bool,
    ) -> Result<(), IndexError> {
        self.with_write(|rw, _env| {
            let (id, kind) = rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            if kind != ResourceKind::Patient {
                return Err(IndexError::BadRequest {
                    message: format!("{public_id} is a {}, not a patient", kind.as_str()),
                });
            }
            rw.db.set_protected_patient(id, protected)?;
            rw.ctx.touched_patients.push(id);
            Ok(())
        })
    }

    // ─── Statistics ─────────────────────────────────────────────────

    pub fn global_statistics(&self) -> Result<GlobalStatistics, IndexError> {
        self.with_read(|ro| {
            let stats = GlobalStatistics {
                disk_size: ro.db.total_compressed_size()?,
                uncompressed_size: ro.db.total_uncompressed_size()?,
                patients: ro.db.count_resources(ResourceKind::Patient)?,
                studies: ro.db.count_resources(ResourceKind::Study)?,
                series: ro.db.count_resources(ResourceKind::Series)?,
                instances: ro.db.count_resources(ResourceKind::Instance)?,
            };
            Ok((stats, Vec::new()))
        })
    }

    /// Totals over one resource's subtree; descendant counts exclude
    /// the resource itself.
    pub fn resource_statistics(&self, public_id: &str) -> Result<ResourceStatistics, IndexError> {
        self.with_read(|ro| {
            let (id, kind) = ro.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let mut stats = ResourceStatistics {
                kind,
                disk_size: 0,
                uncompressed_size: 0,
                studies: 0,
                series: 0,
                instances: 0,
            };
            let mut queue = vec![id];
            while let Some(current) = queue.pop() {
                if current != id {
                    match ro.db.resource_kind(current)? {
                        ResourceKind::Study => stats.studies += 1,
                        ResourceKind::Series => stats.series += 1,
                        ResourceKind::Instance => stats.instances += 1,
                        ResourceKind::Patient => {}
                    }
                }
                for attachment in ro.db.attachments(current)? {
                    stats.disk_size += attachment.compressed_size;
                    stats.uncompressed_size += attachment.uncompressed_size;
                }
                queue.extend(ro.db.children(current)?);
            }
            let patient = containing_patient(ro.db, id)?;
            Ok((stats, vec![patient]))
        })
    }

    // ─── Change journal ─────────────────────────────────────────────

    /// The next page of changes after `since`, plus a flag telling
    /// whether the journal end was reached.
    pub fn changes(&self, since: i64, limit: usize) -> Result<(Vec<Change>, bool), IndexError> {
        self.with_read(|ro| Ok((ro.db.changes_since(since, limit)?, Vec::new())))
    }

    pub fn last_change(&self) -> Result<Option<Change>, IndexError> {
        self.with_read(|ro| Ok((ro.db.last_change()?, Vec::new())))
    }

    /// Purge the journal and reset its sequence counter.
    pub fn delete_changes(&self) -> Result<(), IndexError> {
        self.with_write(|rw, _env| rw.db.clear_changes())
    }

    /// Append a change on behalf of a host frontend. An empty
    /// `public_id` logs a system-wide change with no resource kind.
    pub fn log_change(&self, kind: ChangeKind, public_id: &str) -> Result<(), IndexError> {
        self.with_write(|rw, _env| {
            if public_id.is_empty() {
                rw.log_change(kind, None, "")
            } else {
                let (_, resource_kind) =
                    rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
                rw.log_change(kind, Some(resource_kind), public_id)
            }
        })
    }

    // ─── Exported resources ─────────────────────────────────────────

    /// Record an outbound transfer of the resource to `modality`.
    pub fn log_exported_resource(
        &self,
        public_id: &str,
        modality: &str,
    ) -> Result<ExportedResource, IndexError> {
        self.with_write(|rw, _env| {
            let (id, kind) = rw.db.lookup_resource(public_id)?.ok_or(IndexError::NotFound)?;
            let (patient_id, study_uid, series_uid, sop_uid) = identifier_tuple(&*rw.db, id)?;
            let entry = ExportedResource {
                seq: 0,
                resource_kind: kind,
                public_id: public_id.to_string(),
                modality: modality.to_string(),
                patient_id,
                study_uid,
                series_uid,
                sop_uid,
                timestamp: rw.now,
            };
            let stored = rw.db.log_exported(&entry)?;
            let patient = containing_patient(&*rw.db, id)?;
            rw.ctx.touched_patients.push(patient);
            Ok(stored)
        })
    }

    pub fn exported_resources(
        &self,
        since: i64,
        limit: usize,
    ) -> Result<(Vec<ExportedResource>, bool), IndexError> {
        self.with_read(|ro| Ok((ro.db.exported_since(since, limit)?, Vec::new())))
    }

    pub fn last_exported_resource(&self) -> Result<Option<ExportedResource>, IndexError> {
        self.with_read(|ro| Ok((ro.db.last_exported()?, Vec::new())))
    }

    pub fn delete_exported_resources(&self) -> Result<(), IndexError> {
        self.with_write(|rw, _env| rw.db.clear_exported())
    }

    // ─── Registered modalities & peers ──────────────────────────────

    pub fn modalities_json(&self) -> Result<String, IndexError> {
        self.with_read(|ro| {
            let value = ro
                .db
                .global_property(GlobalProperty::Modalities)?
                .unwrap_or_else(|| "{}".to_string());
            Ok((value, Vec::new()))
        })
    }

    pub fn set_modalities_json(&self, json: &str) -> Result<(), IndexError> {
        validate_json(json)?;
        self.with_write(|rw, _env| {
            rw.db.set_global_property(GlobalProperty::Modalities, json)?;
            rw.log_change(ChangeKind::UpdatedModalities, None, "")
        })
    }

    pub fn peers_json(&self) -> Result<String, IndexError> {
        self.with_read(|ro| {
            let value = ro
                .db
                .global_property(GlobalProperty::Peers)?
                .unwrap_or_else(|| "{}".to_string());
            Ok((value, Vec::new()))
        })
    }

    pub fn set_peers_json(&self, json: &str) -> Result<(), IndexError> {
        validate_json(json)?;
        self.with_write(|rw, _env| {
            rw.db.set_global_property(GlobalProperty::Peers, json)?;
            rw.log_change(ChangeKind::UpdatedPeers, None, "")
        })
    }

    // ─── Quotas & stability ─────────────────────────────────────────

    /// Change the storage quota (0 = unlimited) and recycle down to it.
    pub fn set_max_storage_bytes(&self, bytes: u64) -> Result<(), IndexError> {
        self.inner.lock().config.max_storage_bytes = Some(bytes);
        self.recycle_to_quota()
    }

    /// Change the patient-count quota (0 = unlimited) and recycle
    /// down to it.
    pub fn set_max_patient_count(&self, count: u64) -> Result<(), IndexError> {
        self.inner.lock().config.max_patient_count = Some(count);
        self.recycle_to_quota()
    }

    /// Standalone recycling: delete LRU patients until the store is
    /// back under its quotas.
    pub fn recycle_to_quota(&self) -> Result<(), IndexError> {
        self.with_write(|rw, env| {
            standalone_recycle(
                rw,
                env.recycling,
                env.max_storage_bytes,
                env.max_patient_count,
            )
        })
    }

    /// One stability-monitor step: promote every quiescent resource,
    /// emitting `Stable*` changes children-first. Returns the number
    /// of changes appended. Driven periodically by the monitor
    /// thread; callable directly by embedding hosts.
    pub fn promote_quiescent_resources(&self) -> Result<usize, IndexError> {
        self.ensure_running()?;
        let changes = promote_step(&self.inner, self.clock.as_ref())?;
        let count = changes.len();
        self.bridge.deliver(changes);
        Ok(count)
    }

    /// Number of resources currently tracked as unstable.
    pub fn unstable_resource_count(&self) -> usize {
        self.inner.lock().stability.len()
    }
}

impl Drop for ServerIndex {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One monitor step over the shared state; returns the `Stable*`
/// changes appended so the caller can hand them to the bridge.
pub(crate) fn promote_step(
    inner: &Mutex<IndexInner>,
    clock: &dyn Clock,
) -> Result<Vec<Change>, IndexError> {
    let mut guard = inner.lock();
    let inner = &mut *guard;
    if inner.degraded {
        return Ok(Vec::new());
    }

    let now = clock.unix_seconds();
    let window = inner.config.effective_quiescence_window_secs();
    let max_retries = inner.config.effective_max_retries();
    let IndexInner {
        db,
        stability,
        write_generation,
        ..
    } = inner;

    let due = stability.take_quiescent(now, window);
    if due.is_empty() {
        return Ok(Vec::new());
    }

    match log_stable_changes(db, max_retries, now, &due) {
        Ok(changes) => {
            *write_generation += 1;
            Ok(changes)
        }
        Err(e) => {
            // Keep the entries so the next monitor tick retries.
            for (id, payload) in due {
                stability.restore(id, payload);
            }
            Err(e)
        }
    }
}

/// Append the `Stable*` changes for a batch of promoted resources.
fn log_stable_changes(
    db: &mut Box<dyn IndexDatabase>,
    max_retries: u32,
    now: i64,
    promoted: &[(ResourceId, UnstablePayload)],
) -> Result<Vec<Change>, IndexError> {
    let ((), ctx) = run_read_write(db, max_retries, None, now, |rw| {
        for (_, payload) in promoted {
            if let Some(kind) = ChangeKind::stable_resource(payload.kind) {
                rw.log_change(kind, Some(payload.kind), &payload.public_id)?;
            }
        }
        Ok(())
    })?;
    Ok(ctx.changes)
}

/// The DICOM identifier tuple of a resource, read from the main tags
/// along its ancestor chain. Levels above the resource's kind come
/// back empty.
fn identifier_tuple(
    db: &dyn DatabaseTransaction,
    id: ResourceId,
) -> Result<(String, String, String, String), IndexError> {
    let mut patient_id = String::new();
    let mut study_uid = String::new();
    let mut series_uid = String::new();
    let mut sop_uid = String::new();

    let mut current = Some(id);
    while let Some(resource) = current {
        let kind = db.resource_kind(resource)?;
        let stored = db.main_tags(resource)?;
        let value_of = |tag: DicomTag| {
            stored
                .iter()
                .find(|(t, _)| *t == tag)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        match kind {
            ResourceKind::Patient => patient_id = value_of(tags::PATIENT_ID),
            ResourceKind::Study => study_uid = value_of(tags::STUDY_INSTANCE_UID),
            ResourceKind::Series => series_uid = value_of(tags::SERIES_INSTANCE_UID),
            ResourceKind::Instance => sop_uid = value_of(tags::SOP_INSTANCE_UID),
        }
        current = db.parent(resource)?;
    }

    Ok((patient_id, study_uid, series_uid, sop_uid))
}

fn validate_json(raw: &str) -> Result<(), IndexError> {
    serde_json::from_str::<serde_json::Value>(raw).map_err(|e| IndexError::BadRequest {
        message: format!("malformed JSON value: {e}"),
    })?;
    Ok(())
}
