//! Identity types for DGRID records

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Record identifier. Generated as UUIDv7 so keys sort by creation time.
pub type RecordId = Uuid;

/// Generate a new UUIDv7 RecordId.
pub fn new_record_id() -> RecordId {
    Uuid::now_v7()
}

/// Parse the textual form of a record id.
pub fn parse_record_id(text: &str) -> Result<RecordId, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "id".to_string(),
        });
    }
    Uuid::parse_str(trimmed).map_err(|e| ValidationError::InvalidValue {
        field: "id".to_string(),
        reason: e.to_string(),
    })
}

/// Opaque optimistic-concurrency marker.
///
/// Only equality is meaningful. A token is not a logical clock and carries
/// no ordering between revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(Uuid);

impl VersionToken {
    /// Generate a fresh random token.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for VersionToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ValidationError::InvalidValue {
                field: "version".to_string(),
                reason: e.to_string(),
            })
    }
}
