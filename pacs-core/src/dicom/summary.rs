//! Parsed DICOM summaries.

use rustc_hash::FxHashMap;

use super::tag::DicomTag;

/// The tag/value map extracted from a DICOM instance by the wire or
/// file frontends. Values are the raw strings from the dataset; the
/// index applies identifier normalization itself where needed.
#[derive(Debug, Clone, Default)]
pub struct DicomSummary {
    tags: FxHashMap<DicomTag, String>,
}

impl DicomSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: DicomTag, value: impl Into<String>) -> &mut Self {
        self.tags.insert(tag, value.into());
        self
    }

    pub fn get(&self, tag: DicomTag) -> Option<&str> {
        self.tags.get(&tag).map(String::as_str)
    }

    /// The tag's value, with an empty string standing in for absence.
    pub fn get_or_empty(&self, tag: DicomTag) -> &str {
        self.get(tag).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = (DicomTag, &str)> {
        self.tags.iter().map(|(t, v)| (*t, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
