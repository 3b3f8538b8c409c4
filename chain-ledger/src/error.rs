//! error types for ledger clients

use thiserror::Error;

use crate::types::TxHash;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("rpc unavailable: {0}")]
    Unavailable(String),

    #[error("timeout waiting for {0}")]
    Timeout(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// the raw transaction may have reached the node; `tx_hash` is the
    /// locally computed hash to reconcile against
    #[error("submission outcome unknown for {tx_hash}: {reason}")]
    Ambiguous { tx_hash: TxHash, reason: String },

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("amount {amount} overflows base units at {decimals} decimals")]
    AmountOverflow { amount: u64, decimals: u8 },

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("{0} contract not configured")]
    ContractNotConfigured(&'static str),

    #[error("chain id mismatch: configured {configured}, node reports {reported}")]
    ChainIdMismatch { configured: u64, reported: u64 },

    #[error("client closed")]
    Closed,
}

impl LedgerError {
    /// errors worth retrying on read paths
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LedgerError::Timeout(e.to_string())
        } else if e.is_decode() {
            LedgerError::DecodingError(e.to_string())
        } else {
            LedgerError::Unavailable(e.to_string())
        }
    }
}
