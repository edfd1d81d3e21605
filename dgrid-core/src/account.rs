//! Account record, the reference versioned record type.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::identity::{new_record_id, RecordId, VersionToken};
use crate::record::{Record, Versioning};

/// Placeholder account number given to accounts created without one.
pub const DEFAULT_ACCOUNT_NUMBER: &str = "ААААА-BBB-C-DDDD-EEEEEEE";

// ============================================================================
// ENUMS
// ============================================================================

/// ISO 4217 currency codes accepted on accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CurrencyCode {
    EUR,
    /// Pre-1998 ruble. Kept so historical accounts still decode.
    RUR,
    #[default]
    RUB,
    USD,
}

impl CurrencyCode {
    /// ISO 4217 numeric code.
    pub fn numeric_code(&self) -> u16 {
        match self {
            CurrencyCode::EUR => 978,
            CurrencyCode::RUR => 810,
            CurrencyCode::RUB => 643,
            CurrencyCode::USD => 840,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyCode::EUR => "EUR",
            CurrencyCode::RUR => "RUR",
            CurrencyCode::RUB => "RUB",
            CurrencyCode::USD => "USD",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CurrencyCode::EUR => "Euro Member Countries",
            CurrencyCode::RUR => "Russian Ruble (pre-1998)",
            CurrencyCode::RUB => "Russian Ruble",
            CurrencyCode::USD => "United States Dollar",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CurrencyCode {
    type Err = UnknownCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EUR" => Ok(CurrencyCode::EUR),
            "RUR" => Ok(CurrencyCode::RUR),
            "RUB" => Ok(CurrencyCode::RUB),
            "USD" => Ok(CurrencyCode::USD),
            _ => Err(UnknownCodeError(s.to_string())),
        }
    }
}

/// Lifecycle status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Blocked,
    #[default]
    Created,
    Closed,
    Freeze,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Blocked => "BLOCKED",
            AccountStatus::Created => "CREATED",
            AccountStatus::Closed => "CLOSED",
            AccountStatus::Freeze => "FREEZE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AccountStatus::Active => "Account is active",
            AccountStatus::Blocked => "Account is blocked",
            AccountStatus::Created => "Account is created",
            AccountStatus::Closed => "Account is closed",
            AccountStatus::Freeze => "Account is frozen",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = UnknownCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(AccountStatus::Active),
            "BLOCKED" => Ok(AccountStatus::Blocked),
            "CREATED" => Ok(AccountStatus::Created),
            "CLOSED" => Ok(AccountStatus::Closed),
            "FREEZE" => Ok(AccountStatus::Freeze),
            _ => Err(UnknownCodeError(s.to_string())),
        }
    }
}

/// Error when parsing an unknown currency or status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCodeError(pub String);

impl fmt::Display for UnknownCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown code: {}", self.0)
    }
}

impl std::error::Error for UnknownCodeError {}

// ============================================================================
// ACCOUNT RECORD
// ============================================================================

/// A customer account.
///
/// Fields missing from inbound JSON take the account defaults, including a
/// freshly generated id, so a create request may omit everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    #[serde(default = "new_record_id")]
    pub id: RecordId,

    #[serde(default = "default_account_number")]
    pub number: String,

    #[serde(rename = "currencyISO4217", alias = "currency", default)]
    pub currency: CurrencyCode,

    #[serde(default)]
    pub credit: bool,

    /// Exact decimal amount, carried on the wire as a string ("10000.00").
    #[serde(default = "zero_amount", with = "amount_text")]
    pub amount: BigDecimal,

    #[serde(default)]
    pub status: AccountStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_id: Option<RecordId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionToken>,
}

impl AccountRecord {
    /// Open a new account in `CREATED` status with a fresh id.
    pub fn new(number: impl Into<String>, currency: CurrencyCode, credit: bool, amount: BigDecimal) -> Self {
        Self {
            id: new_record_id(),
            number: number.into(),
            currency,
            credit,
            amount,
            status: AccountStatus::Created,
            meta_id: None,
            version: None,
        }
    }

    /// Copy the account's content into a new unversioned `CREATED` account
    /// with the same id.
    pub fn reissue(&self) -> Self {
        Self {
            status: AccountStatus::Created,
            version: None,
            ..self.clone()
        }
    }

    /// Same account content, ignoring status, metadata and version.
    pub fn same_content(&self, other: &AccountRecord) -> bool {
        self.id == other.id
            && self.amount == other.amount
            && self.currency == other.currency
            && self.number == other.number
    }
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT_NUMBER, CurrencyCode::RUB, false, zero_amount())
    }
}

impl Record for AccountRecord {
    const RECORD_TYPE: &'static str = "account";
    const VERSIONING: Versioning = Versioning::Versioned;

    fn id(&self) -> RecordId {
        self.id
    }

    fn version(&self) -> Option<VersionToken> {
        self.version
    }

    fn set_version(&mut self, token: VersionToken) {
        self.version = Some(token);
    }
}

fn default_account_number() -> String {
    DEFAULT_ACCOUNT_NUMBER.to_string()
}

fn zero_amount() -> BigDecimal {
    BigDecimal::new(0.into(), 2)
}

mod amount_text {
    use std::str::FromStr;

    use bigdecimal::num_bigint::Sign;
    use bigdecimal::BigDecimal;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AmountRepr {
        Text(String),
        Number(serde_json::Number),
    }

    /// Plain text with the stored scale kept, so `0.00` stays `"0.00"`.
    pub fn format(amount: &BigDecimal) -> String {
        let (digits, scale) = amount.as_bigint_and_exponent();
        if scale <= 0 {
            return amount.with_scale(0).as_bigint_and_exponent().0.to_string();
        }
        let scale = scale as usize;
        let mut text = digits.magnitude().to_string();
        if text.len() <= scale {
            text.insert_str(0, &"0".repeat(scale + 1 - text.len()));
        }
        text.insert(text.len() - scale, '.');
        if digits.sign() == Sign::Minus {
            text.insert(0, '-');
        }
        text
    }

    pub fn serialize<S: Serializer>(amount: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(amount))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        let text = match AmountRepr::deserialize(deserializer)? {
            AmountRepr::Text(text) => text,
            AmountRepr::Number(number) => number.to_string(),
        };
        BigDecimal::from_str(text.trim())
            .map_err(|e| de::Error::custom(format!("invalid amount '{}': {}", text, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_fields() -> Result<(), Box<dyn std::error::Error>> {
        let account = AccountRecord::from_json(&json!({}))?;
        assert_eq!(account.number, DEFAULT_ACCOUNT_NUMBER);
        assert_eq!(account.currency, CurrencyCode::RUB);
        assert!(!account.credit);
        assert_eq!(amount_text::format(&account.amount), "0.00");
        assert_eq!(account.to_json()?["amount"], json!("0.00"));
        assert_eq!(account.status, AccountStatus::Created);
        assert!(account.version.is_none());
        assert!(!account.id.is_nil());
        Ok(())
    }

    #[test]
    fn test_currency_alias_and_amount_text() -> Result<(), Box<dyn std::error::Error>> {
        let account = AccountRecord::from_json(&json!({
            "currency": "USD",
            "credit": false,
            "amount": "10000.00"
        }))?;
        assert_eq!(account.currency, CurrencyCode::USD);
        assert_eq!(account.amount, BigDecimal::from_str("10000.00")?);

        let wire = account.to_json()?;
        assert_eq!(wire["currencyISO4217"], json!("USD"));
        assert_eq!(wire["amount"], json!("10000.00"));
        assert!(wire.get("version").is_none());
        assert!(wire.get("metaId").is_none());
        Ok(())
    }

    #[test]
    fn test_amount_text_keeps_scale() -> Result<(), Box<dyn std::error::Error>> {
        for text in ["0.00", "10000.00", "1.50", "0.10", "100", "-0.05", "0.001"] {
            let account = AccountRecord::from_json(&json!({ "amount": text }))?;
            assert_eq!(account.to_json()?["amount"], json!(text));
        }
        assert_eq!(AccountRecord::default().to_json()?["amount"], json!("0.00"));
        Ok(())
    }

    #[test]
    fn test_numeric_amount_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let account = AccountRecord::from_json(&json!({ "amount": 12.5 }))?;
        assert_eq!(account.amount, BigDecimal::from_str("12.5")?);
        Ok(())
    }

    #[test]
    fn test_malformed_id_rejected() {
        let err = AccountRecord::from_json(&json!({ "id": "nope" })).unwrap_err();
        assert!(err.to_string().contains("account"));
    }

    #[test]
    fn test_unknown_currency_rejected() {
        assert!(AccountRecord::from_json(&json!({ "currency": "XXX" })).is_err());
    }

    #[test]
    fn test_version_round_trips_through_wire() -> Result<(), Box<dyn std::error::Error>> {
        let mut account = AccountRecord::default();
        let token = VersionToken::fresh();
        account.set_version(token);
        let decoded = AccountRecord::from_json(&account.to_json()?)?;
        assert_eq!(decoded.version, Some(token));
        assert_eq!(decoded, account);
        Ok(())
    }

    #[test]
    fn test_reissue_clears_version_and_status() {
        let mut account = AccountRecord::default();
        account.status = AccountStatus::Active;
        account.version = Some(VersionToken::fresh());
        let copy = account.reissue();
        assert_eq!(copy.id, account.id);
        assert_eq!(copy.status, AccountStatus::Created);
        assert!(copy.version.is_none());
        assert!(copy.same_content(&account));
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(CurrencyCode::USD.numeric_code(), 840);
        assert_eq!(CurrencyCode::RUB.numeric_code(), 643);
        assert_eq!("eur".parse::<CurrencyCode>(), Ok(CurrencyCode::EUR));
        assert!("zzz".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AccountStatus::Freeze.to_string(), "FREEZE");
        assert_eq!("closed".parse::<AccountStatus>(), Ok(AccountStatus::Closed));
    }
}
