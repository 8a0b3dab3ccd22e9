//! Blob storage area.

use std::sync::Arc;

use crate::errors::IndexError;

/// The content-addressed blob store holding attachment bytes.
///
/// The index only remembers uuids; it reclaims blobs of deleted
/// attachments after the owning transaction has committed, and never
/// touches the storage area while holding its own lock.
pub trait StorageArea: Send + Sync {
    fn create(&self, uuid: &str, content: &[u8]) -> Result<(), IndexError>;
    fn read(&self, uuid: &str) -> Result<Vec<u8>, IndexError>;
    fn remove(&self, uuid: &str) -> Result<(), IndexError>;
}

impl<T: StorageArea + ?Sized> StorageArea for Arc<T> {
    fn create(&self, uuid: &str, content: &[u8]) -> Result<(), IndexError> {
        (**self).create(uuid, content)
    }
    fn read(&self, uuid: &str) -> Result<Vec<u8>, IndexError> {
        (**self).read(uuid)
    }
    fn remove(&self, uuid: &str) -> Result<(), IndexError> {
        (**self).remove(uuid)
    }
}
