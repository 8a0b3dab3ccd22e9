//! The Store operation: ingest one instance into the four-level
//! hierarchy.
//!
//! Contract highlights:
//! - ancestors are found-or-created top-down and never re-tagged;
//!   a pre-existing ancestor whose identifier tags or parent linkage
//!   disagree with the incoming summary is a `Conflict`;
//! - quota admission (and any recycling it triggers) happens in the
//!   same transaction, before the instance is inserted;
//! - emitted changes are ordered `Deleted* < NewPatient < NewStudy <
//!   NewSeries < NewInstance`, all sharing the commit.

use pacs_core::dicom::registry::{normalize_identifier, MainTagRegistry};
use pacs_core::dicom::summary::DicomSummary;
use pacs_core::dicom::tag::tags;
use pacs_core::types::enums::{AttachmentKind, ChangeKind, MetadataKind, ResourceKind};
use pacs_core::types::identifiers::ResourceId;
use pacs_core::types::origin::InstanceOrigin;
use pacs_core::types::statistics::{StoreOutcome, StoreReceipt};
use pacs_core::{IndexError, ResourceHasher};

use super::recycling::recycle_for_admission;
use super::transaction::{RwTx, SubtreeStats};
use crate::index::{StoreRequest, WriteEnv};

pub(crate) fn store_instance(
    rw: &mut RwTx<'_, '_>,
    env: &WriteEnv<'_>,
    request: &StoreRequest,
) -> Result<StoreReceipt, IndexError> {
    if !request
        .attachments
        .iter()
        .any(|a| a.kind == AttachmentKind::Dicom)
    {
        return Err(IndexError::BadRequest {
            message: "store request without a DICOM attachment".to_string(),
        });
    }

    let hasher = ResourceHasher::from_summary(&request.summary)?;

    // An existing instance short-circuits unless overwriting.
    if let Some((existing, kind)) = rw.db.lookup_resource(hasher.instance_id())? {
        if kind != ResourceKind::Instance {
            return Err(IndexError::Conflict {
                details: format!(
                    "public id {} already names a {}",
                    hasher.instance_id(),
                    kind.as_str()
                ),
            });
        }
        if !request.overwrite {
            if let Some((patient, _)) = rw.db.lookup_resource(hasher.patient_id())? {
                rw.ctx.touched_patients.push(patient);
            }
            return Ok(StoreReceipt {
                outcome: StoreOutcome::AlreadyStored,
                patient_id: hasher.patient_id().to_string(),
                study_id: hasher.study_id().to_string(),
                series_id: hasher.series_id().to_string(),
                instance_id: hasher.instance_id().to_string(),
                created: Vec::new(),
            });
        }
        // Overwrite: drop the old instance row only; its ancestors
        // are about to be reused.
        let mut stats = SubtreeStats::default();
        rw.delete_subtree(existing, &mut stats)?;
    }

    // Admission before any insertion, so a recycling failure leaves
    // the database untouched.
    let incoming_size: u64 = request.attachments.iter().map(|a| a.compressed_size).sum();
    recycle_for_admission(
        rw,
        env.recycling,
        env.max_storage_bytes,
        env.max_patient_count,
        incoming_size,
        hasher.patient_id(),
    )?;

    let mut created: Vec<(ResourceKind, String)> = Vec::new();
    let patient = find_or_create(
        rw,
        env.registry,
        &request.summary,
        hasher.patient_id(),
        ResourceKind::Patient,
        None,
        &mut created,
    )?;
    let study = find_or_create(
        rw,
        env.registry,
        &request.summary,
        hasher.study_id(),
        ResourceKind::Study,
        Some(patient),
        &mut created,
    )?;
    let series = find_or_create(
        rw,
        env.registry,
        &request.summary,
        hasher.series_id(),
        ResourceKind::Series,
        Some(study),
        &mut created,
    )?;
    let instance = find_or_create(
        rw,
        env.registry,
        &request.summary,
        hasher.instance_id(),
        ResourceKind::Instance,
        Some(series),
        &mut created,
    )?;

    for attachment in &request.attachments {
        rw.db.add_attachment(instance, attachment)?;
    }

    write_instance_provenance(rw, instance, request)?;
    apply_metadata_map(rw, request, &created, patient, study, series, instance)?;

    // New* changes after any deletions, parent before child.
    for (kind, public_id) in &created {
        rw.log_change(ChangeKind::new_resource(*kind), Some(*kind), public_id)?;
    }

    // Stability marks, child before parent.
    for (id, kind) in [
        (series, ResourceKind::Series),
        (study, ResourceKind::Study),
        (patient, ResourceKind::Patient),
    ] {
        let public_id = rw.db.public_id(id)?;
        rw.ctx.touched_unstable.push((id, kind, public_id));
    }

    if created.iter().any(|(k, _)| *k == ResourceKind::Patient) {
        rw.ctx
            .new_patients
            .push((patient, hasher.patient_id().to_string()));
    }
    rw.ctx.touched_patients.push(patient);

    Ok(StoreReceipt {
        outcome: StoreOutcome::Created,
        patient_id: hasher.patient_id().to_string(),
        study_id: hasher.study_id().to_string(),
        series_id: hasher.series_id().to_string(),
        instance_id: hasher.instance_id().to_string(),
        created,
    })
}

/// Find or create one hierarchy level. A freshly created resource
/// receives all main tags of its level; a pre-existing one is checked
/// for consistency and left untouched.
fn find_or_create(
    rw: &mut RwTx<'_, '_>,
    registry: &MainTagRegistry,
    summary: &DicomSummary,
    public_id: &str,
    kind: ResourceKind,
    parent: Option<ResourceId>,
    created: &mut Vec<(ResourceKind, String)>,
) -> Result<ResourceId, IndexError> {
    if let Some((id, existing_kind)) = rw.db.lookup_resource(public_id)? {
        if existing_kind != kind {
            return Err(IndexError::Conflict {
                details: format!(
                    "public id {public_id} already names a {}",
                    existing_kind.as_str()
                ),
            });
        }
        if rw.db.parent(id)? != parent {
            return Err(IndexError::Conflict {
                details: format!(
                    "{} {public_id} is attached to a different parent",
                    kind.as_str()
                ),
            });
        }
        check_identifier_tags(rw, registry, summary, id, kind)?;
        return Ok(id);
    }

    let id = rw.db.create_resource(public_id, kind, parent)?;
    for tag in registry.main_tags(kind) {
        if let Some(value) = summary.get(tag) {
            rw.db.set_main_tag(id, tag, value)?;
            if registry.is_identifier(tag, kind) {
                rw.db
                    .set_identifier_tag(id, tag, &normalize_identifier(value))?;
            }
        }
    }
    created.push((kind, public_id.to_string()));
    Ok(id)
}

/// Ancestor tags are immutable: identifier tags stored on an existing
/// resource must agree with the incoming summary.
fn check_identifier_tags(
    rw: &mut RwTx<'_, '_>,
    registry: &MainTagRegistry,
    summary: &DicomSummary,
    id: ResourceId,
    kind: ResourceKind,
) -> Result<(), IndexError> {
    let stored = rw.db.main_tags(id)?;
    for tag in registry.main_tags(kind) {
        if !registry.is_identifier(tag, kind) {
            continue;
        }
        let incoming = match summary.get(tag) {
            Some(v) => v,
            None => continue,
        };
        if let Some((_, existing)) = stored.iter().find(|(t, _)| *t == tag) {
            if normalize_identifier(existing) != normalize_identifier(incoming) {
                return Err(IndexError::Conflict {
                    details: format!(
                        "{} tag {tag} differs from the stored value",
                        kind.as_str()
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Reception metadata recorded on every stored instance.
fn write_instance_provenance(
    rw: &mut RwTx<'_, '_>,
    instance: ResourceId,
    request: &StoreRequest,
) -> Result<(), IndexError> {
    let now = rw.now;
    rw.db
        .set_metadata(instance, MetadataKind::ReceptionDate, &now.to_string())?;
    rw.db
        .set_metadata(instance, MetadataKind::Origin, &request.origin.to_json())?;

    match &request.origin {
        InstanceOrigin::DicomAssociation {
            remote_aet,
            called_aet,
        } => {
            rw.db
                .set_metadata(instance, MetadataKind::RemoteAet, remote_aet)?;
            rw.db
                .set_metadata(instance, MetadataKind::CalledAet, called_aet)?;
        }
        InstanceOrigin::RestApi {
            remote_ip: Some(ip),
        } => {
            rw.db.set_metadata(instance, MetadataKind::RemoteIp, ip)?;
        }
        _ => {}
    }

    if let Some(ts) = &request.transfer_syntax {
        rw.db
            .set_metadata(instance, MetadataKind::TransferSyntax, ts)?;
    }
    if let Some(sop_class) = &request.sop_class_uid {
        rw.db
            .set_metadata(instance, MetadataKind::SopClassUid, sop_class)?;
    }
    if let Some(number) = request.summary.get(tags::INSTANCE_NUMBER) {
        rw.db
            .set_metadata(instance, MetadataKind::IndexInSeries, number.trim())?;
    }
    Ok(())
}

/// Caller-supplied metadata: always applied to the instance, applied
/// to ancestors only when this call created them (existing ancestors
/// are never rewritten).
fn apply_metadata_map(
    rw: &mut RwTx<'_, '_>,
    request: &StoreRequest,
    created: &[(ResourceKind, String)],
    patient: ResourceId,
    study: ResourceId,
    series: ResourceId,
    instance: ResourceId,
) -> Result<(), IndexError> {
    for (level, kind, value) in &request.metadata {
        let target = match level {
            ResourceKind::Patient => patient,
            ResourceKind::Study => study,
            ResourceKind::Series => series,
            ResourceKind::Instance => instance,
        };
        let level_created = created.iter().any(|(k, _)| k == level);
        if *level != ResourceKind::Instance && !level_created {
            continue;
        }
        rw.db.set_metadata(target, *kind, value)?;
    }
    Ok(())
}
