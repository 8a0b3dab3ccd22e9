//! # pacs-core
//!
//! Foundation crate for the PACS server index.
//! Defines the semantic types, DICOM tag machinery, capability traits,
//! errors, and configuration shared by every crate in the workspace.

pub mod config;
pub mod dicom;
pub mod errors;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export the most commonly used types at the crate root.
pub use config::IndexConfig;
pub use dicom::hasher::ResourceHasher;
pub use dicom::registry::MainTagRegistry;
pub use dicom::summary::DicomSummary;
pub use dicom::tag::DicomTag;
pub use errors::error_code::PacsErrorCode;
pub use errors::IndexError;
pub use types::change::{Change, ExportedResource};
pub use types::enums::{
    AttachmentKind, ChangeKind, CompressionKind, GlobalProperty, MetadataKind, ResourceKind,
    TransactionKind,
};
pub use types::identifiers::ResourceId;
