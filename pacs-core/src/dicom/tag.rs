//! DICOM tag type and the tags indexed by the store.

use std::fmt;
use std::str::FromStr;

use crate::errors::IndexError;

/// A DICOM tag, `(group, element)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DicomTag {
    pub group: u16,
    pub element: u16,
}

impl DicomTag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }
}

impl fmt::Display for DicomTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x},{:04x}", self.group, self.element)
    }
}

impl FromStr for DicomTag {
    type Err = IndexError;

    /// Parses the `"gggg,eeee"` form used in configuration overrides.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || IndexError::BadRequest {
            message: format!("invalid DICOM tag: {raw:?}"),
        };
        let (group, element) = raw.split_once(',').ok_or_else(invalid)?;
        let group = u16::from_str_radix(group.trim(), 16).map_err(|_| invalid())?;
        let element = u16::from_str_radix(element.trim(), 16).map_err(|_| invalid())?;
        Ok(Self::new(group, element))
    }
}

/// The tags persisted as main-tag columns, by hierarchy level.
pub mod tags {
    use super::DicomTag;

    // Patient level
    pub const PATIENT_NAME: DicomTag = DicomTag::new(0x0010, 0x0010);
    pub const PATIENT_ID: DicomTag = DicomTag::new(0x0010, 0x0020);
    pub const PATIENT_BIRTH_DATE: DicomTag = DicomTag::new(0x0010, 0x0030);
    pub const PATIENT_SEX: DicomTag = DicomTag::new(0x0010, 0x0040);

    // Study level
    pub const STUDY_DATE: DicomTag = DicomTag::new(0x0008, 0x0020);
    pub const STUDY_TIME: DicomTag = DicomTag::new(0x0008, 0x0030);
    pub const ACCESSION_NUMBER: DicomTag = DicomTag::new(0x0008, 0x0050);
    pub const REFERRING_PHYSICIAN_NAME: DicomTag = DicomTag::new(0x0008, 0x0090);
    pub const STUDY_DESCRIPTION: DicomTag = DicomTag::new(0x0008, 0x1030);
    pub const INSTITUTION_NAME: DicomTag = DicomTag::new(0x0008, 0x0080);
    pub const STUDY_ID: DicomTag = DicomTag::new(0x0020, 0x0010);
    pub const STUDY_INSTANCE_UID: DicomTag = DicomTag::new(0x0020, 0x000d);

    // Series level
    pub const MODALITY: DicomTag = DicomTag::new(0x0008, 0x0060);
    pub const STATION_NAME: DicomTag = DicomTag::new(0x0008, 0x1010);
    pub const SERIES_DESCRIPTION: DicomTag = DicomTag::new(0x0008, 0x103e);
    pub const BODY_PART_EXAMINED: DicomTag = DicomTag::new(0x0018, 0x0015);
    pub const SERIES_INSTANCE_UID: DicomTag = DicomTag::new(0x0020, 0x000e);
    pub const SERIES_NUMBER: DicomTag = DicomTag::new(0x0020, 0x0011);

    // Instance level
    pub const SOP_INSTANCE_UID: DicomTag = DicomTag::new(0x0008, 0x0018);
    pub const INSTANCE_NUMBER: DicomTag = DicomTag::new(0x0020, 0x0013);
    pub const IMAGE_POSITION_PATIENT: DicomTag = DicomTag::new(0x0020, 0x0032);
    pub const NUMBER_OF_FRAMES: DicomTag = DicomTag::new(0x0028, 0x0008);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parses_and_formats_the_config_form() {
        let tag: DicomTag = "0020,000d".parse().unwrap();
        assert_eq!(tag, tags::STUDY_INSTANCE_UID);
        assert_eq!(tag.to_string(), "0020,000d");
        assert!("0020".parse::<DicomTag>().is_err());
        assert!("xxxx,000d".parse::<DicomTag>().is_err());
    }
}
