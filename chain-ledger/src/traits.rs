//! Core trait for per-chain ledger clients.
//!
//! One implementation instance exists per configured chain. Reads report
//! "not yet mined" as `None`, never as an error. Writes resolve the signing
//! key and read nonce and gas price fresh on every call.

use async_trait::async_trait;

use crate::config::ChainConfig;
use crate::error::Result;
use crate::types::{ReceiptInfo, TransactionInfo, TxHash};

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Static configuration of the chain this client talks to.
    fn chain(&self) -> &ChainConfig;

    /// Check if the chain endpoint answers.
    async fn is_available(&self) -> bool;

    /// Look up a transaction by hash.
    async fn get_transaction(&self, hash: &TxHash) -> Result<Option<TransactionInfo>>;

    /// Look up a mined receipt by hash.
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<ReceiptInfo>>;

    /// Transfer `amount` whole reward tokens to `to`.
    ///
    /// Returns once the node accepted the signed transaction.
    async fn transfer(&self, to: &str, amount: u64) -> Result<TxHash>;

    /// Mint a badge NFT with the given metadata URI.
    async fn mint_badge(&self, to: &str, metadata_uri: &str) -> Result<TxHash>;

    /// Release connections; later calls fail with `LedgerError::Closed`.
    async fn close(&self);
}
