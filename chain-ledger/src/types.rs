//! ledger read/write value types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, Result};

/// 0x-prefixed lowercase transaction hash
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl AsRef<str>) -> Self {
        let hash = hash.as_ref().trim().to_ascii_lowercase();
        if hash.starts_with("0x") {
            Self(hash)
        } else {
            Self(format!("0x{}", hash))
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// transaction as returned by the node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub hash: TxHash,
    pub from: String,
    /// `None` for contract creation
    pub to: Option<String>,
    pub nonce: u64,
    /// `None` while pending
    pub block_number: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// mined receipt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub hash: TxHash,
    pub status: ReceiptStatus,
    pub block_number: u64,
    pub gas_used: u64,
}

impl ReceiptInfo {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// convert whole tokens to base units
pub fn to_base_units(amount: u64, decimals: u8) -> Result<u128> {
    10u128
        .checked_pow(decimals as u32)
        .and_then(|scale| (amount as u128).checked_mul(scale))
        .ok_or(LedgerError::AmountOverflow { amount, decimals })
}

/// parse a json-rpc hex quantity
pub fn parse_quantity(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::DecodingError(format!("quantity without 0x: {}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::DecodingError(format!("quantity {}: {}", value, e)))
}

/// parse a 20-byte hex address
pub fn parse_address(value: &str) -> Result<[u8; 20]> {
    let digits = value.trim().trim_start_matches("0x");
    let bytes = hex::decode(digits).map_err(|_| LedgerError::InvalidAddress(value.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::InvalidAddress(value.to_string()))
}

/// case-insensitive address comparison
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_units_scale() {
        assert_eq!(to_base_units(25, 18).unwrap(), 25_000_000_000_000_000_000);
        assert_eq!(to_base_units(7, 0).unwrap(), 7);
        assert!(matches!(
            to_base_units(u64::MAX, 40),
            Err(LedgerError::AmountOverflow { .. })
        ));
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x3b9aca00").unwrap(), 1_000_000_000);
        assert!(parse_quantity("12").is_err());
    }

    #[test]
    fn address_parsing() {
        let addr = parse_address("0x00000000000000000000000000000000000000Ff").unwrap();
        assert_eq!(addr[19], 0xff);
        assert!(parse_address("0x1234").is_err());
        assert!(same_address("0xAbC", "0xabc"));
    }

    #[test]
    fn tx_hash_normalizes() {
        assert_eq!(TxHash::new("ABCD").as_str(), "0xabcd");
        assert_eq!(TxHash::new("0xAbCd"), TxHash::new("0xabcd"));
    }
}
