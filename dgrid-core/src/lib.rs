//! DGRID Core - Record Types
//!
//! Record identity, the optimistic versioning protocol, error types and
//! service configuration. Every other DGRID crate depends on this one.
//! Nothing in here talks to a cache or a network.

pub mod account;
pub mod config;
pub mod error;
pub mod identity;
pub mod record;
pub mod version;

pub use account::{AccountRecord, AccountStatus, CurrencyCode, UnknownCodeError};
pub use config::ServiceConfig;
pub use error::{ConfigError, DgridError, DgridResult, StorageError, ValidationError};
pub use identity::{new_record_id, parse_record_id, RecordId, VersionToken};
pub use record::{Record, Versioning};
pub use version::{assign_version, is_version_set, is_versioned, renew_version, tokens_equal};
