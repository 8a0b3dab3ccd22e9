//! Deterministic public-id derivation.
//!
//! Public ids are SHA-1 digests of the per-level identifier tuple,
//! rendered as 40 lowercase hex digits in five dash-separated groups
//! of eight. Any two implementations fed the same DICOM input must
//! produce identical ids, so neither the joining character nor the
//! rendering may ever change.

use sha1::{Digest, Sha1};

use super::summary::DicomSummary;
use super::tag::tags;
use crate::errors::IndexError;

/// The four public ids derived from one DICOM summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHasher {
    patient: String,
    study: String,
    series: String,
    instance: String,
}

impl ResourceHasher {
    /// Derive all four ids from a parsed summary.
    ///
    /// `PatientID` may be absent (some modalities omit it); the three
    /// UIDs are mandatory and their absence is a `BadRequest`.
    pub fn from_summary(summary: &DicomSummary) -> Result<Self, IndexError> {
        let patient_id = summary.get_or_empty(tags::PATIENT_ID);
        let study_uid = required(summary, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
        let series_uid = required(summary, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
        let sop_uid = required(summary, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?;

        Ok(Self {
            patient: hash_tuple(&[patient_id]),
            study: hash_tuple(&[patient_id, study_uid]),
            series: hash_tuple(&[patient_id, study_uid, series_uid]),
            instance: hash_tuple(&[patient_id, study_uid, series_uid, sop_uid]),
        })
    }

    pub fn patient_id(&self) -> &str {
        &self.patient
    }

    pub fn study_id(&self) -> &str {
        &self.study
    }

    pub fn series_id(&self) -> &str {
        &self.series
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }
}

fn required<'a>(
    summary: &'a DicomSummary,
    tag: super::tag::DicomTag,
    name: &str,
) -> Result<&'a str, IndexError> {
    match summary.get(tag) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(IndexError::BadRequest {
            message: format!("DICOM summary without {name}"),
        }),
    }
}

fn hash_tuple(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..16],
        &digest[16..24],
        &digest[24..32],
        &digest[32..40]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::tag::tags;

    fn summary(patient: &str, study: &str, series: &str, sop: &str) -> DicomSummary {
        let mut s = DicomSummary::new();
        s.set(tags::PATIENT_ID, patient)
            .set(tags::STUDY_INSTANCE_UID, study)
            .set(tags::SERIES_INSTANCE_UID, series)
            .set(tags::SOP_INSTANCE_UID, sop);
        s
    }

    #[test]
    fn ids_are_deterministic_and_well_formed() {
        let a = ResourceHasher::from_summary(&summary("PID1", "1.2.3", "1.2.3.4", "1.2.3.4.5"))
            .unwrap();
        let b = ResourceHasher::from_summary(&summary("PID1", "1.2.3", "1.2.3.4", "1.2.3.4.5"))
            .unwrap();
        assert_eq!(a, b);

        for id in [a.patient_id(), a.study_id(), a.series_id(), a.instance_id()] {
            assert_eq!(id.len(), 44);
            assert_eq!(id.matches('-').count(), 4);
            assert!(id
                .chars()
                .all(|c| c == '-' || c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn each_level_extends_the_tuple() {
        let a = ResourceHasher::from_summary(&summary("PID1", "1.2.3", "1.2.3.4", "1.2.3.4.5"))
            .unwrap();
        let b = ResourceHasher::from_summary(&summary("PID1", "1.2.3", "1.2.3.4", "9.9.9.9.9"))
            .unwrap();
        assert_eq!(a.patient_id(), b.patient_id());
        assert_eq!(a.study_id(), b.study_id());
        assert_eq!(a.series_id(), b.series_id());
        assert_ne!(a.instance_id(), b.instance_id());
    }

    #[test]
    fn patient_id_may_be_empty_but_uids_are_mandatory() {
        let mut no_patient = DicomSummary::new();
        no_patient
            .set(tags::STUDY_INSTANCE_UID, "1.2.3")
            .set(tags::SERIES_INSTANCE_UID, "1.2.3.4")
            .set(tags::SOP_INSTANCE_UID, "1.2.3.4.5");
        assert!(ResourceHasher::from_summary(&no_patient).is_ok());

        let mut no_sop = DicomSummary::new();
        no_sop
            .set(tags::PATIENT_ID, "PID1")
            .set(tags::STUDY_INSTANCE_UID, "1.2.3")
            .set(tags::SERIES_INSTANCE_UID, "1.2.3.4");
        assert!(matches!(
            ResourceHasher::from_summary(&no_sop),
            Err(IndexError::BadRequest { .. })
        ));
    }

    #[test]
    fn different_patients_diverge_at_the_top() {
        let a = ResourceHasher::from_summary(&summary("PID1", "1.2.3", "1.2.3.4", "1.2.3.4.5"))
            .unwrap();
        let b = ResourceHasher::from_summary(&summary("PID2", "1.2.3", "1.2.3.4", "1.2.3.4.5"))
            .unwrap();
        assert_ne!(a.patient_id(), b.patient_id());
        assert_ne!(a.study_id(), b.study_id());
    }
}
