//! DGRID Test Utilities
//!
//! Centralized test infrastructure for the DGRID workspace:
//! - An unversioned record type for exercising last-writer-wins paths
//! - Proptest generators for account records and their wire bodies
//! - Test fixtures for common scenarios
//! - Custom assertions for DGRID-specific validation

// Re-export the embedded grid from its source crate
pub use dgrid_storage::{CacheHandleManager, CacheOp, InMemoryGrid};

// Re-export core types for convenience
pub use dgrid_core::{
    new_record_id, AccountRecord, AccountStatus, CurrencyCode, Record, RecordId, ServiceConfig,
    StorageError, VersionToken, Versioning,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// UNVERSIONED RECORD
// ============================================================================

/// Free-form note attached to an account. Unversioned: updates overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditNote {
    #[serde(default = "new_record_id")]
    pub id: RecordId,
    pub account_id: Option<RecordId>,
    #[serde(default)]
    pub text: String,
}

impl AuditNote {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            account_id: None,
            text: text.into(),
        }
    }
}

impl Record for AuditNote {
    const RECORD_TYPE: &'static str = "audit-note";

    fn id(&self) -> RecordId {
        self.id
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating DGRID record types.

    use super::*;
    use bigdecimal::BigDecimal;
    use proptest::prelude::*;
    use serde_json::{json, Value as JsonValue};
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a random VersionToken.
    pub fn arb_version_token() -> impl Strategy<Value = VersionToken> {
        arb_uuid().prop_map(VersionToken::from_uuid)
    }

    /// Generate a CurrencyCode variant.
    pub fn arb_currency() -> impl Strategy<Value = CurrencyCode> {
        prop_oneof![
            Just(CurrencyCode::EUR),
            Just(CurrencyCode::RUR),
            Just(CurrencyCode::RUB),
            Just(CurrencyCode::USD),
        ]
    }

    /// Generate an AccountStatus variant.
    pub fn arb_status() -> impl Strategy<Value = AccountStatus> {
        prop_oneof![
            Just(AccountStatus::Active),
            Just(AccountStatus::Blocked),
            Just(AccountStatus::Created),
            Just(AccountStatus::Closed),
            Just(AccountStatus::Freeze),
        ]
    }

    /// Generate a two-decimal amount.
    pub fn arb_amount() -> impl Strategy<Value = BigDecimal> {
        (0i64..1_000_000_000).prop_map(|cents| BigDecimal::new(cents.into(), 2))
    }

    /// Generate an unversioned account with a fresh id.
    pub fn arb_account() -> impl Strategy<Value = AccountRecord> {
        (arb_currency(), any::<bool>(), arb_amount(), "[A-Z0-9-]{4,24}").prop_map(
            |(currency, credit, amount, number)| AccountRecord::new(number, currency, credit, amount),
        )
    }

    /// Generate a create-request body without id or version.
    pub fn arb_account_body() -> impl Strategy<Value = JsonValue> {
        (arb_currency(), any::<bool>(), arb_amount()).prop_map(|(currency, credit, amount)| {
            json!({
                "currency": currency.as_str(),
                "credit": credit,
                "amount": amount.to_string(),
            })
        })
    }

    /// Generate an audit note.
    pub fn arb_audit_note() -> impl Strategy<Value = AuditNote> {
        ".{0,64}".prop_map(|text| AuditNote::new(text))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common scenarios.

    use super::*;
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;
    use std::time::Duration;

    /// Service config for the `account` namespace on an ephemeral HTTP port
    /// with no cache settle delay.
    pub fn account_config() -> ServiceConfig {
        ServiceConfig::default()
            .with_namespace("account")
            .with_http("127.0.0.1", 0)
            .with_cache_settle(Duration::ZERO)
    }

    /// The create body used throughout the account walkthrough.
    pub fn usd_account_body() -> JsonValue {
        json!({"currency": "USD", "credit": false, "amount": "0.00"})
    }

    /// A handle manager already connected to `grid`.
    pub fn connected_handles(
        grid: &InMemoryGrid,
        cache_name: &str,
    ) -> Result<Arc<CacheHandleManager>, StorageError> {
        let handles = Arc::new(CacheHandleManager::new(cache_name));
        handles.install_manager(grid.manager())?;
        Ok(handles)
    }

    /// An account already carrying a version token.
    pub fn versioned_account() -> AccountRecord {
        AccountRecord {
            version: Some(VersionToken::fresh()),
            ..AccountRecord::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion helpers for DGRID-specific validation.

    use super::*;
    use serde_json::Value as JsonValue;

    /// Assert a record carries a version token.
    pub fn assert_versioned<R: Record>(record: &R) {
        assert!(
            record.version().is_some(),
            "expected {} {} to carry a version",
            R::RECORD_TYPE,
            record.id()
        );
    }

    /// Assert the grid holds exactly `expected` for `key`.
    pub fn assert_stored<R: Record + PartialEq>(grid: &InMemoryGrid, cache: &str, expected: &R) {
        let bytes = grid.peek(cache, expected.id());
        let stored = bytes.as_deref().map(R::decode);
        match stored {
            Some(Ok(record)) => assert_eq!(&record, expected),
            Some(Err(e)) => panic!("stored {} is undecodable: {}", R::RECORD_TYPE, e),
            None => panic!("{} {} is not stored", R::RECORD_TYPE, expected.id()),
        }
    }

    /// Assert the grid holds nothing for `key`.
    pub fn assert_absent(grid: &InMemoryGrid, cache: &str, key: RecordId) {
        assert!(grid.peek(cache, key).is_none(), "{} is still stored", key);
    }

    /// Assert a JSON field is present and is a parseable id.
    pub fn assert_id_field(json: &JsonValue, field: &str) -> RecordId {
        match json.get(field).and_then(JsonValue::as_str).map(dgrid_core::parse_record_id) {
            Some(Ok(id)) => id,
            other => panic!("field '{}' is not an id: {:?}", field, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_note_is_unversioned() -> Result<(), StorageError> {
        let mut note = AuditNote::new("opened");
        note.set_version(VersionToken::fresh());
        assert_eq!(note.version(), None);
        assert_eq!(AuditNote::VERSIONING, Versioning::Unversioned);

        let decoded = AuditNote::decode(&note.encode()?)?;
        assert_eq!(decoded, note);
        Ok(())
    }
}
