//! Closed enums of the resource model.
//!
//! Every enum that is persisted carries explicit integer codes. The
//! codes are part of the on-disk format and of the plugin ABI; new
//! variants append at the end, existing codes never change.

use serde::{Deserialize, Serialize};

/// The four levels of the resource hierarchy, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Patient,
    Study,
    Series,
    Instance,
}

impl ResourceKind {
    pub fn as_int(self) -> i64 {
        match self {
            Self::Patient => 1,
            Self::Study => 2,
            Self::Series => 3,
            Self::Instance => 4,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Patient),
            2 => Some(Self::Study),
            3 => Some(Self::Series),
            4 => Some(Self::Instance),
            _ => None,
        }
    }

    /// The kind immediately below, if any.
    pub fn child(self) -> Option<Self> {
        match self {
            Self::Patient => Some(Self::Study),
            Self::Study => Some(Self::Series),
            Self::Series => Some(Self::Instance),
            Self::Instance => None,
        }
    }

    /// The kind immediately above, if any.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Patient => None,
            Self::Study => Some(Self::Patient),
            Self::Series => Some(Self::Study),
            Self::Instance => Some(Self::Series),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::Study => "Study",
            Self::Series => "Series",
            Self::Instance => "Instance",
        }
    }
}

/// Kinds of entries in the change journal.
///
/// The closed set of the index contract; new kinds append at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    NewInstance,
    NewSeries,
    NewStudy,
    NewPatient,
    Deleted,
    StablePatient,
    StableStudy,
    StableSeries,
    UpdatedAttachment,
    UpdatedMetadata,
    UpdatedPeers,
    UpdatedModalities,
}

impl ChangeKind {
    pub fn as_int(self) -> i64 {
        match self {
            Self::NewInstance => 1,
            Self::NewSeries => 2,
            Self::NewStudy => 3,
            Self::NewPatient => 4,
            Self::Deleted => 5,
            Self::StablePatient => 6,
            Self::StableStudy => 7,
            Self::StableSeries => 8,
            Self::UpdatedAttachment => 9,
            Self::UpdatedMetadata => 10,
            Self::UpdatedPeers => 11,
            Self::UpdatedModalities => 12,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::NewInstance),
            2 => Some(Self::NewSeries),
            3 => Some(Self::NewStudy),
            4 => Some(Self::NewPatient),
            5 => Some(Self::Deleted),
            6 => Some(Self::StablePatient),
            7 => Some(Self::StableStudy),
            8 => Some(Self::StableSeries),
            9 => Some(Self::UpdatedAttachment),
            10 => Some(Self::UpdatedMetadata),
            11 => Some(Self::UpdatedPeers),
            12 => Some(Self::UpdatedModalities),
            _ => None,
        }
    }

    /// The `New*` kind announcing a fresh resource of the given level.
    pub fn new_resource(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Patient => Self::NewPatient,
            ResourceKind::Study => Self::NewStudy,
            ResourceKind::Series => Self::NewSeries,
            ResourceKind::Instance => Self::NewInstance,
        }
    }

    /// The `Stable*` kind for the given level. Instances have no
    /// stability state.
    pub fn stable_resource(kind: ResourceKind) -> Option<Self> {
        match kind {
            ResourceKind::Patient => Some(Self::StablePatient),
            ResourceKind::Study => Some(Self::StableStudy),
            ResourceKind::Series => Some(Self::StableSeries),
            ResourceKind::Instance => None,
        }
    }
}

/// Kinds of string metadata attached to a resource.
///
/// Codes mirror the original installation base and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKind {
    IndexInSeries,
    ReceptionDate,
    RemoteAet,
    LastUpdate,
    Origin,
    TransferSyntax,
    SopClassUid,
    RemoteIp,
    CalledAet,
}

impl MetadataKind {
    pub fn as_int(self) -> i64 {
        match self {
            Self::IndexInSeries => 1,
            Self::ReceptionDate => 2,
            Self::RemoteAet => 3,
            Self::LastUpdate => 7,
            Self::Origin => 8,
            Self::TransferSyntax => 9,
            Self::SopClassUid => 10,
            Self::RemoteIp => 11,
            Self::CalledAet => 12,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::IndexInSeries),
            2 => Some(Self::ReceptionDate),
            3 => Some(Self::RemoteAet),
            7 => Some(Self::LastUpdate),
            8 => Some(Self::Origin),
            9 => Some(Self::TransferSyntax),
            10 => Some(Self::SopClassUid),
            11 => Some(Self::RemoteIp),
            12 => Some(Self::CalledAet),
            _ => None,
        }
    }
}

/// Content kinds of attachments. The user range is reserved for host
/// frontends and plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentKind {
    Dicom,
    DicomAsJson,
    Preview,
    User(u16),
}

impl AttachmentKind {
    pub const USER_RANGE_START: u16 = 1024;

    pub fn as_int(self) -> i64 {
        match self {
            Self::Dicom => 1,
            Self::DicomAsJson => 2,
            Self::Preview => 3,
            Self::User(code) => i64::from(code),
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Dicom),
            2 => Some(Self::DicomAsJson),
            3 => Some(Self::Preview),
            v if (i64::from(Self::USER_RANGE_START)..=i64::from(u16::MAX)).contains(&v) => {
                Some(Self::User(v as u16))
            }
            _ => None,
        }
    }
}

/// Compression applied to an attachment before it reached the storage
/// area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    Zlib,
}

impl CompressionKind {
    pub fn as_int(self) -> i64 {
        match self {
            Self::None => 1,
            Self::Zlib => 2,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Zlib),
            _ => None,
        }
    }
}

/// Keys of the persistent global-property table.
///
/// The integer values are shared with every past and future
/// implementation of the store; they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalProperty {
    SchemaVersion,
    ChangeSequence,
    ExportedSequence,
    Modalities,
    Peers,
    MainTagOverrides,
}

impl GlobalProperty {
    pub fn as_int(self) -> i64 {
        match self {
            Self::SchemaVersion => 1,
            Self::ChangeSequence => 2,
            Self::ExportedSequence => 3,
            Self::Modalities => 20,
            Self::Peers => 21,
            Self::MainTagOverrides => 22,
        }
    }
}

/// The two transaction kinds offered by the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    ReadOnly,
    ReadWrite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_navigation_is_symmetric() {
        for kind in [
            ResourceKind::Patient,
            ResourceKind::Study,
            ResourceKind::Series,
            ResourceKind::Instance,
        ] {
            if let Some(child) = kind.child() {
                assert_eq!(child.parent(), Some(kind));
            }
            if let Some(parent) = kind.parent() {
                assert_eq!(parent.child(), Some(kind));
            }
        }
    }

    #[test]
    fn integer_codes_round_trip() {
        for value in 1..=12 {
            let kind = ChangeKind::from_int(value).unwrap();
            assert_eq!(kind.as_int(), value);
        }
        assert!(ChangeKind::from_int(0).is_none());
        assert!(ChangeKind::from_int(13).is_none());

        assert_eq!(AttachmentKind::from_int(1), Some(AttachmentKind::Dicom));
        assert_eq!(
            AttachmentKind::from_int(2048),
            Some(AttachmentKind::User(2048))
        );
        assert!(AttachmentKind::from_int(500).is_none());
    }

    #[test]
    fn global_property_keys_are_stable() {
        assert_eq!(GlobalProperty::SchemaVersion.as_int(), 1);
        assert_eq!(GlobalProperty::ChangeSequence.as_int(), 2);
        assert_eq!(GlobalProperty::ExportedSequence.as_int(), 3);
        assert_eq!(GlobalProperty::Modalities.as_int(), 20);
        assert_eq!(GlobalProperty::Peers.as_int(), 21);
    }
}
