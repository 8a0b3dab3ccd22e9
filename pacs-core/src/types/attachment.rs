//! Attachment records.

use serde::{Deserialize, Serialize};

use super::enums::{AttachmentKind, CompressionKind};

/// A blob belonging to a resource.
///
/// The index only ever remembers the storage-area uuid; the bytes
/// themselves live in the storage area and are written by the host
/// before the attachment row is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub uuid: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compressed_hash: String,
    pub uncompressed_hash: String,
    pub compression: CompressionKind,
}

impl Attachment {
    /// An uncompressed attachment; both sizes and hashes coincide.
    pub fn uncompressed(kind: AttachmentKind, uuid: &str, size: u64, hash: &str) -> Self {
        Self {
            kind,
            uuid: uuid.to_string(),
            compressed_size: size,
            uncompressed_size: size,
            compressed_hash: hash.to_string(),
            uncompressed_hash: hash.to_string(),
            compression: CompressionKind::None,
        }
    }
}
