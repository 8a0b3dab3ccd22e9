//! Index configuration.

use serde::{Deserialize, Serialize};

use crate::errors::IndexError;

/// Configuration for the server index.
///
/// All limits follow the convention `0 = unlimited`. Every field is
/// optional so that hosts can deserialize a partial TOML table and let
/// the `effective_*` accessors fill in the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum total compressed size of all attachments, in bytes.
    /// 0 = unlimited.
    pub max_storage_bytes: Option<u64>,
    /// Maximum number of patients kept in the store. 0 = unlimited.
    pub max_patient_count: Option<u64>,
    /// Seconds without a write-side touch before a resource is
    /// promoted to stable. Default: 60.
    pub quiescence_window_secs: Option<u64>,
    /// Interval of the write-ahead flush thread, in seconds. Default: 10.
    pub flush_interval_secs: Option<u64>,
    /// Capacity of the stability tracker. Eviction promotes the oldest
    /// entry immediately. Default: 10_000.
    pub stability_capacity: Option<usize>,
    /// Number of times a transaction is re-run on transient contention.
    /// Default: 10.
    pub max_retries: Option<u32>,
}

impl IndexConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, IndexError> {
        toml::from_str(raw).map_err(|e| IndexError::BadRequest {
            message: format!("invalid configuration: {e}"),
        })
    }

    /// Effective storage quota in bytes; 0 means unlimited.
    pub fn effective_max_storage_bytes(&self) -> u64 {
        self.max_storage_bytes.unwrap_or(0)
    }

    /// Effective patient-count quota; 0 means unlimited.
    pub fn effective_max_patient_count(&self) -> u64 {
        self.max_patient_count.unwrap_or(0)
    }

    /// Effective quiescence window, defaulting to 60 seconds.
    pub fn effective_quiescence_window_secs(&self) -> u64 {
        self.quiescence_window_secs.unwrap_or(60)
    }

    /// Effective flush interval, defaulting to 10 seconds.
    pub fn effective_flush_interval_secs(&self) -> u64 {
        self.flush_interval_secs.unwrap_or(10)
    }

    /// Effective stability tracker capacity, defaulting to 10 000 entries.
    pub fn effective_stability_capacity(&self) -> usize {
        self.stability_capacity.unwrap_or(10_000)
    }

    /// Effective retry budget, defaulting to 10 attempts.
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = IndexConfig::default();
        assert_eq!(config.effective_max_storage_bytes(), 0);
        assert_eq!(config.effective_max_patient_count(), 0);
        assert_eq!(config.effective_quiescence_window_secs(), 60);
        assert_eq!(config.effective_flush_interval_secs(), 10);
        assert_eq!(config.effective_max_retries(), 10);
    }

    #[test]
    fn partial_toml_only_overrides_named_fields() {
        let config =
            IndexConfig::from_toml_str("max_storage_bytes = 2000\nquiescence_window_secs = 5\n")
                .unwrap();
        assert_eq!(config.effective_max_storage_bytes(), 2000);
        assert_eq!(config.effective_quiescence_window_secs(), 5);
        assert_eq!(config.effective_flush_interval_secs(), 10);
    }

    #[test]
    fn invalid_toml_is_a_bad_request() {
        let err = IndexConfig::from_toml_str("max_storage_bytes = \"a lot\"").unwrap_err();
        assert!(matches!(err, IndexError::BadRequest { .. }));
    }
}
