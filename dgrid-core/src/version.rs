//! Optimistic versioning protocol.
//!
//! The remote cache has no compare-and-swap, so concurrency control lives
//! here at the application layer. An update reads the stored record,
//! compares tokens with [`tokens_equal`] and only then writes. The read and
//! the write are separate cache calls; two updaters holding the same token
//! can both pass the check before either writes.

use crate::identity::VersionToken;
use crate::record::Record;

/// True if the record type declares version semantics.
pub fn is_versioned<R: Record>() -> bool {
    R::VERSIONING.is_versioned()
}

/// True if the record already carries a token.
pub fn is_version_set<R: Record>(record: &R) -> bool {
    record.version().is_some()
}

/// Give the record a fresh token unless it already has one.
///
/// Never overwrites an existing token. Returns true when a token was
/// assigned.
pub fn assign_version<R: Record>(record: &mut R) -> bool {
    if !is_versioned::<R>() || is_version_set(record) {
        return false;
    }
    record.set_version(VersionToken::fresh());
    true
}

/// Replace the record's token with a fresh one.
///
/// Only the update write path uses this; everything else goes through
/// [`assign_version`]. Returns the new token, or `None` for unversioned
/// types.
pub fn renew_version<R: Record>(record: &mut R) -> Option<VersionToken> {
    if !is_versioned::<R>() {
        return None;
    }
    let token = VersionToken::fresh();
    record.set_version(token);
    Some(token)
}

/// Compare two records' tokens. False if either token is unset.
pub fn tokens_equal<R: Record>(a: &R, b: &R) -> bool {
    match (a.version(), b.version()) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRecord;
    use crate::identity::{new_record_id, RecordId};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Plain {
        id: RecordId,
    }

    impl Record for Plain {
        const RECORD_TYPE: &'static str = "plain";

        fn id(&self) -> RecordId {
            self.id
        }
    }

    #[test]
    fn test_is_versioned_by_type() {
        assert!(is_versioned::<AccountRecord>());
        assert!(!is_versioned::<Plain>());
    }

    #[test]
    fn test_assign_version_sets_once() {
        let mut account = AccountRecord::default();
        assert!(!is_version_set(&account));
        assert!(assign_version(&mut account));
        let first = account.version;
        assert!(first.is_some());

        assert!(!assign_version(&mut account));
        assert_eq!(account.version, first);
    }

    #[test]
    fn test_assign_version_ignores_unversioned() {
        let mut plain = Plain { id: new_record_id() };
        assert!(!assign_version(&mut plain));
        assert!(!is_version_set(&plain));
        assert_eq!(renew_version(&mut plain), None);
    }

    #[test]
    fn test_renew_version_replaces_token() {
        let mut account = AccountRecord::default();
        assign_version(&mut account);
        let before = account.version;
        let renewed = renew_version(&mut account);
        assert!(renewed.is_some());
        assert_ne!(account.version, before);
        assert_eq!(account.version, renewed);
    }

    #[test]
    fn test_tokens_equal_requires_both_set() {
        let mut a = AccountRecord::default();
        let mut b = a.clone();
        assert!(!tokens_equal(&a, &b));

        assign_version(&mut a);
        assert!(!tokens_equal(&a, &b));
        assert!(!tokens_equal(&b, &a));

        b.version = a.version;
        assert!(tokens_equal(&a, &b));
    }

    proptest! {
        #[test]
        fn prop_tokens_equal_is_value_equality(x in any::<[u8; 16]>(), y in any::<[u8; 16]>()) {
            let mut a = AccountRecord::default();
            let mut b = a.clone();
            a.version = Some(VersionToken::from_uuid(Uuid::from_bytes(x)));
            b.version = Some(VersionToken::from_uuid(Uuid::from_bytes(y)));
            prop_assert_eq!(tokens_equal(&a, &b), x == y);
        }

        #[test]
        fn prop_assign_version_never_overwrites(x in any::<[u8; 16]>()) {
            let preset = VersionToken::from_uuid(Uuid::from_bytes(x));
            let mut account = AccountRecord { version: Some(preset), ..AccountRecord::default() };
            prop_assert!(!assign_version(&mut account));
            prop_assert_eq!(account.version, Some(preset));
        }
    }
}
