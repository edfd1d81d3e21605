//! Record trait shared by every type a DGRID service stores.
//!
//! A record type declares its name, its key and whether it takes part in
//! optimistic concurrency. The same trait doubles as the codec between the
//! JSON wire envelope and the opaque bytes kept in the remote cache, so the
//! generic service code never needs per-type glue.

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{StorageError, ValidationError};
use crate::identity::{RecordId, VersionToken};

/// Whether a record type carries a version token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Versioning {
    /// Every stored revision carries exactly one token.
    Versioned,
    /// Records are written as-is, updates are last-writer-wins.
    Unversioned,
}

impl Versioning {
    pub fn is_versioned(self) -> bool {
        matches!(self, Versioning::Versioned)
    }
}

impl fmt::Display for Versioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Versioning::Versioned => write!(f, "versioned"),
            Versioning::Unversioned => write!(f, "unversioned"),
        }
    }
}

/// A domain record that can be stored by a DGRID service.
///
/// # Implementation Requirements
///
/// - `id()` must be stable for the lifetime of the record
/// - versioned types must return the token last passed to `set_version`
/// - unversioned types keep the default `version`/`set_version`, which
///   report no token and ignore writes
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Record type name used in logs and error messages (e.g. "account").
    const RECORD_TYPE: &'static str;

    /// Concurrency capability of this type.
    const VERSIONING: Versioning = Versioning::Unversioned;

    /// The cache key of this record.
    fn id(&self) -> RecordId;

    /// The current version token, if any.
    fn version(&self) -> Option<VersionToken> {
        None
    }

    /// Store a version token. Unversioned types ignore the call.
    fn set_version(&mut self, _token: VersionToken) {}

    /// Decode a record from its wire JSON.
    fn from_json(json: &JsonValue) -> Result<Self, ValidationError> {
        serde_json::from_value(json.clone()).map_err(|e| ValidationError::MalformedRecord {
            record_type: Self::RECORD_TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    /// Encode this record as wire JSON.
    fn to_json(&self) -> Result<JsonValue, ValidationError> {
        serde_json::to_value(self).map_err(|e| ValidationError::MalformedRecord {
            record_type: Self::RECORD_TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    /// Encode this record for storage in the remote cache.
    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Codec {
            reason: e.to_string(),
        })
    }

    /// Decode a record previously written with `encode`.
    fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Codec {
            reason: format!("{} record: {}", Self::RECORD_TYPE, e),
        })
    }
}
