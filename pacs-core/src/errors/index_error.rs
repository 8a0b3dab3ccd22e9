//! The error taxonomy shared by the database wrapper and the index.

use super::error_code::{self, PacsErrorCode};

/// Errors surfaced by index operations.
///
/// `Busy` is transient and recovered by the transaction manager via
/// retry; every other kind aborts the current transaction and reaches
/// the caller.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("resource not found")]
    NotFound,

    #[error("resource already exists")]
    AlreadyExists,

    #[error("identifier conflict: {details}")]
    Conflict { details: String },

    #[error("storage quota exceeded and no recyclable patient available")]
    FullStorage,

    #[error("database corrupt: {details}")]
    Corrupt { details: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("database busy (transient contention)")]
    Busy,

    #[error("index is shutting down")]
    Shutdown,

    #[error("database error: {message}")]
    Database { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl IndexError {
    /// True for errors recovered by re-running the whole transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// True once the store must be treated as unusable for writes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

impl PacsErrorCode for IndexError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => error_code::NOT_FOUND,
            Self::AlreadyExists => error_code::ALREADY_EXISTS,
            Self::Conflict { .. } => error_code::CONFLICT,
            Self::FullStorage => error_code::FULL_STORAGE,
            Self::Corrupt { .. } => error_code::CORRUPT,
            Self::BadRequest { .. } => error_code::BAD_REQUEST,
            Self::Busy => error_code::BUSY,
            Self::Shutdown => error_code::SHUTDOWN,
            Self::Database { .. } => error_code::DATABASE,
            Self::Io { .. } => error_code::IO,
            Self::Internal { .. } => error_code::INTERNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_the_only_transient_kind() {
        assert!(IndexError::Busy.is_transient());
        assert!(!IndexError::NotFound.is_transient());
        assert!(!IndexError::FullStorage.is_transient());
        assert!(!IndexError::Shutdown.is_transient());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(IndexError::Busy.error_code(), "INDEX_BUSY");
        assert_eq!(
            IndexError::Conflict {
                details: "x".into()
            }
            .error_code(),
            "INDEX_CONFLICT"
        );
        assert_eq!(IndexError::FullStorage.error_code(), "INDEX_FULL_STORAGE");
    }
}
