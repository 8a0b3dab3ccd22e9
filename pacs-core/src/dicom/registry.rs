//! Main-tag registry: which tags are persisted at which level, and
//! which of them take part in public-id derivation.

use rustc_hash::FxHashMap;
use serde::Deserialize;

use super::tag::{tags, DicomTag};
use crate::errors::IndexError;
use crate::types::enums::ResourceKind;

/// Registry entry for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry {
    pub level: ResourceKind,
    /// Identifier tags are normalized and indexed for exact lookup.
    pub identifier: bool,
}

/// Per-installation override, deserialized from the JSON kept in the
/// global-property table: `[{"tag": "0008,1080", "level": "Study"}]`.
#[derive(Debug, Deserialize)]
struct TagOverride {
    tag: String,
    level: ResourceKind,
    #[serde(default)]
    identifier: bool,
}

/// Process-wide table resolving tags to hierarchy levels.
///
/// Built once at index construction from the static dictionary plus
/// the persisted overrides; read-only afterwards.
#[derive(Debug, Clone)]
pub struct MainTagRegistry {
    entries: FxHashMap<DicomTag, TagEntry>,
}

impl MainTagRegistry {
    /// The built-in dictionary.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            entries: FxHashMap::default(),
        };
        let mut add = |tag, level, identifier| {
            registry.entries.insert(tag, TagEntry { level, identifier });
        };

        add(tags::PATIENT_ID, ResourceKind::Patient, true);
        add(tags::PATIENT_NAME, ResourceKind::Patient, false);
        add(tags::PATIENT_BIRTH_DATE, ResourceKind::Patient, false);
        add(tags::PATIENT_SEX, ResourceKind::Patient, false);

        add(tags::STUDY_INSTANCE_UID, ResourceKind::Study, true);
        add(tags::ACCESSION_NUMBER, ResourceKind::Study, true);
        add(tags::STUDY_DATE, ResourceKind::Study, false);
        add(tags::STUDY_TIME, ResourceKind::Study, false);
        add(tags::STUDY_ID, ResourceKind::Study, false);
        add(tags::STUDY_DESCRIPTION, ResourceKind::Study, false);
        add(tags::REFERRING_PHYSICIAN_NAME, ResourceKind::Study, false);
        add(tags::INSTITUTION_NAME, ResourceKind::Study, false);

        add(tags::SERIES_INSTANCE_UID, ResourceKind::Series, true);
        add(tags::MODALITY, ResourceKind::Series, false);
        add(tags::SERIES_NUMBER, ResourceKind::Series, false);
        add(tags::SERIES_DESCRIPTION, ResourceKind::Series, false);
        add(tags::STATION_NAME, ResourceKind::Series, false);
        add(tags::BODY_PART_EXAMINED, ResourceKind::Series, false);

        add(tags::SOP_INSTANCE_UID, ResourceKind::Instance, true);
        add(tags::INSTANCE_NUMBER, ResourceKind::Instance, false);
        add(tags::IMAGE_POSITION_PATIENT, ResourceKind::Instance, false);
        add(tags::NUMBER_OF_FRAMES, ResourceKind::Instance, false);

        registry
    }

    /// Apply the per-installation overrides persisted as a global
    /// property. Unknown tags are added, known tags re-levelled.
    pub fn apply_overrides_json(&mut self, raw: &str) -> Result<(), IndexError> {
        let overrides: Vec<TagOverride> =
            serde_json::from_str(raw).map_err(|e| IndexError::BadRequest {
                message: format!("malformed main-tag overrides: {e}"),
            })?;
        for entry in overrides {
            let tag: DicomTag = entry.tag.parse()?;
            self.entries.insert(
                tag,
                TagEntry {
                    level: entry.level,
                    identifier: entry.identifier,
                },
            );
        }
        Ok(())
    }

    /// Level at which the tag is persisted, if it is a main tag.
    pub fn level_of(&self, tag: DicomTag) -> Option<ResourceKind> {
        self.entries.get(&tag).map(|e| e.level)
    }

    /// Whether the tag is an identifier tag at the given level.
    pub fn is_identifier(&self, tag: DicomTag, level: ResourceKind) -> bool {
        self.entries
            .get(&tag)
            .map(|e| e.level == level && e.identifier)
            .unwrap_or(false)
    }

    /// The main tags of one level, sorted for deterministic iteration.
    pub fn main_tags(&self, level: ResourceKind) -> Vec<DicomTag> {
        let mut tags: Vec<DicomTag> = self
            .entries
            .iter()
            .filter(|(_, e)| e.level == level)
            .map(|(t, _)| *t)
            .collect();
        tags.sort();
        tags
    }
}

/// Normalization applied to identifier-tag values before insertion and
/// lookup: trim, collapse internal whitespace runs, ASCII uppercase.
pub fn normalize_identifier(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    let mut pending_space = false;
    for token in value.split_whitespace() {
        if pending_space {
            normalized.push(' ');
        }
        for c in token.chars() {
            normalized.push(c.to_ascii_uppercase());
        }
        pending_space = true;
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_the_canonical_identifier_tuple() {
        let registry = MainTagRegistry::with_defaults();
        assert_eq!(
            registry.level_of(tags::PATIENT_ID),
            Some(ResourceKind::Patient)
        );
        assert!(registry.is_identifier(tags::PATIENT_ID, ResourceKind::Patient));
        assert!(registry.is_identifier(tags::STUDY_INSTANCE_UID, ResourceKind::Study));
        assert!(registry.is_identifier(tags::SERIES_INSTANCE_UID, ResourceKind::Series));
        assert!(registry.is_identifier(tags::SOP_INSTANCE_UID, ResourceKind::Instance));
        assert!(!registry.is_identifier(tags::MODALITY, ResourceKind::Series));
        // Not an identifier at another level.
        assert!(!registry.is_identifier(tags::PATIENT_ID, ResourceKind::Study));
    }

    #[test]
    fn overrides_extend_and_relevel() {
        let mut registry = MainTagRegistry::with_defaults();
        registry
            .apply_overrides_json(r#"[{"tag": "0008,1080", "level": "Study"}]"#)
            .unwrap();
        assert_eq!(
            registry.level_of(DicomTag::new(0x0008, 0x1080)),
            Some(ResourceKind::Study)
        );

        assert!(registry.apply_overrides_json("not json").is_err());
    }

    #[test]
    fn main_tags_are_sorted_and_level_scoped() {
        let registry = MainTagRegistry::with_defaults();
        let series = registry.main_tags(ResourceKind::Series);
        assert!(series.contains(&tags::MODALITY));
        assert!(!series.contains(&tags::PATIENT_ID));
        let mut sorted = series.clone();
        sorted.sort();
        assert_eq!(series, sorted);
    }

    #[test]
    fn identifier_normalization_trims_folds_and_collapses() {
        assert_eq!(normalize_identifier("  pid  1 \t x "), "PID 1 X");
        assert_eq!(normalize_identifier("already-NORMAL"), "ALREADY-NORMAL");
        assert_eq!(normalize_identifier("   "), "");
    }
}
