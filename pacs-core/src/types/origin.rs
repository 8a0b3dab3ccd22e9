//! Provenance of a stored instance.

use serde::{Deserialize, Serialize};

use crate::errors::IndexError;

/// Where an instance entered the system. Serialized to JSON and kept
/// as instance metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InstanceOrigin {
    Unknown,
    DicomAssociation {
        remote_aet: String,
        called_aet: String,
    },
    RestApi {
        remote_ip: Option<String>,
    },
    Plugin,
}

impl InstanceOrigin {
    pub fn to_json(&self) -> String {
        // Serialization of a tag-only enum cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{\"source\":\"unknown\"}".to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, IndexError> {
        serde_json::from_str(raw).map_err(|e| IndexError::Internal {
            message: format!("malformed instance origin: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_round_trips_through_json() {
        let origin = InstanceOrigin::DicomAssociation {
            remote_aet: "CT_SCANNER".to_string(),
            called_aet: "PACS".to_string(),
        };
        let parsed = InstanceOrigin::from_json(&origin.to_json()).unwrap();
        assert_eq!(parsed, origin);
    }
}
