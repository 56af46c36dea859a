//! Disbursement records and validated claim inputs.

use crate::error::{GateError, GateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed disbursement. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementRecord {
    pub id: u64,
    pub identity_address: String,
    pub destination_address: String,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: Option<String>,
}

/// A record before the store assigns its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDisbursement {
    pub identity_address: String,
    pub destination_address: String,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: Option<String>,
}

impl NewDisbursement {
    pub fn into_record(self, id: u64) -> DisbursementRecord {
        DisbursementRecord {
            id,
            identity_address: self.identity_address,
            destination_address: self.destination_address,
            amount: self.amount,
            timestamp: self.timestamp,
            transaction_hash: self.transaction_hash,
        }
    }
}

/// A request to move `amount` tokens to `destination_address` on behalf of
/// `identity_address`. Construction validates every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    identity_address: String,
    destination_address: String,
    amount: u64,
}

impl Claim {
    pub fn new(identity_address: &str, destination_address: &str, amount: u64) -> GateResult<Self> {
        let identity_address = require_address("identity_address", Some(identity_address))?;
        let destination_address = require_address("destination_address", Some(destination_address))?;
        if amount == 0 {
            return Err(GateError::InvalidArgument(
                "amount must be a positive integer".to_string(),
            ));
        }

        Ok(Self {
            identity_address,
            destination_address,
            amount,
        })
    }

    /// Build a claim from loosely typed request fields
    pub fn from_parts(
        identity_address: Option<&str>,
        destination_address: Option<&str>,
        amount: Option<&serde_json::Value>,
    ) -> GateResult<Self> {
        let identity_address = require_address("identity_address", identity_address)?;
        let destination_address = require_address("destination_address", destination_address)?;
        let amount = parse_amount(amount)?;
        Self::new(&identity_address, &destination_address, amount)
    }

    pub fn identity_address(&self) -> &str {
        &self.identity_address
    }

    pub fn destination_address(&self) -> &str {
        &self.destination_address
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn to_disbursement(
        &self,
        timestamp: DateTime<Utc>,
        transaction_hash: Option<String>,
    ) -> NewDisbursement {
        NewDisbursement {
            identity_address: self.identity_address.clone(),
            destination_address: self.destination_address.clone(),
            amount: self.amount,
            timestamp,
            transaction_hash,
        }
    }
}

fn require_address(field: &str, value: Option<&str>) -> GateResult<String> {
    match value.map(str::trim) {
        Some(v) if v.chars().any(char::is_control) => Err(GateError::InvalidArgument(format!(
            "{} contains control characters",
            field
        ))),
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(GateError::InvalidArgument(format!("{} cannot be empty", field))),
    }
}

/// Accepts a JSON number or a numeric string; anything else, zero included,
/// is rejected.
pub fn parse_amount(value: Option<&serde_json::Value>) -> GateResult<u64> {
    let invalid = || GateError::InvalidArgument("amount must be a positive integer".to_string());

    let amount = match value {
        None | Some(serde_json::Value::Null) => {
            return Err(GateError::InvalidArgument("amount cannot be empty".to_string()))
        }
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
            return Err(GateError::InvalidArgument("amount cannot be empty".to_string()))
        }
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().map_err(|_| invalid())?,
        Some(serde_json::Value::Number(n)) => n.as_u64().ok_or_else(invalid)?,
        Some(_) => return Err(invalid()),
    };

    if amount == 0 {
        return Err(invalid());
    }
    Ok(amount)
}

/// Parse an optional RFC 3339 timestamp; absent means "now"
pub fn parse_timestamp(value: Option<&str>) -> GateResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Err(GateError::InvalidArgument(
            "timestamp cannot be empty".to_string(),
        )),
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| GateError::InvalidArgument(format!("invalid timestamp '{}': {}", raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_claim_trims_addresses() {
        let claim = Claim::new("  0xabc ", "0xdef", 5).unwrap();
        assert_eq!(claim.identity_address(), "0xabc");
        assert_eq!(claim.destination_address(), "0xdef");
        assert_eq!(claim.amount(), 5);
    }

    #[test]
    fn test_claim_rejects_empty_fields() {
        let err = Claim::new("", "0xdef", 5).unwrap_err();
        assert!(err.to_string().contains("identity_address"));

        let err = Claim::new("0xabc", "   ", 5).unwrap_err();
        assert!(err.to_string().contains("destination_address"));

        let err = Claim::new("0xabc", "0xdef", 0).unwrap_err();
        assert!(matches!(err, GateError::InvalidArgument(_)));
    }

    #[test]
    fn test_claim_rejects_control_characters() {
        let err = Claim::new("0xabc\0x", "0xdef", 5).unwrap_err();
        assert_eq!(err.to_string(), "identity_address contains control characters");

        // Surrounding whitespace is trimmed before the check
        assert!(Claim::new("\t0xabc\n", "0xdef", 5).is_ok());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(Some(&json!(20))).unwrap(), 20);
        assert_eq!(parse_amount(Some(&json!("20"))).unwrap(), 20);
        assert_eq!(parse_amount(Some(&json!(" 7 "))).unwrap(), 7);

        for bad in [json!(0), json!(-3), json!(1.5), json!("abc"), json!(true), json!([1])] {
            assert!(parse_amount(Some(&bad)).is_err(), "{} should be rejected", bad);
        }

        let err = parse_amount(None).unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
        let err = parse_amount(Some(&json!(""))).unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_from_parts_missing_identity() {
        let err = Claim::from_parts(None, Some("0xdef"), Some(&json!(1))).unwrap_err();
        assert_eq!(err.to_string(), "identity_address cannot be empty");
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp(None).unwrap(), None);

        let ts = parse_timestamp(Some("2024-03-10T08:00:00+08:00")).unwrap().unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-10T00:00:00+00:00");

        assert!(parse_timestamp(Some("")).is_err());
        assert!(parse_timestamp(Some("yesterday")).is_err());
    }
}
