//! Mock ledger for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::ChainConfig;
use crate::error::{LedgerError, Result};
use crate::traits::LedgerClient;
use crate::types::{ReceiptInfo, ReceiptStatus, TransactionInfo, TxHash};

/// A write accepted by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedWrite {
    Transfer { to: String, amount: u64, tx_hash: TxHash },
    Mint { to: String, metadata_uri: String, tx_hash: TxHash },
}

/// How the next writes should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    InsufficientFunds,
    Unavailable,
    /// outcome unknown to the caller; `landed` controls whether the
    /// transaction actually made it on chain
    Ambiguous { landed: bool },
}

/// In-memory ledger.
///
/// Configurable transactions, receipts and write failures for unit tests.
pub struct MockLedger {
    config: ChainConfig,
    available: AtomicBool,
    transactions: RwLock<HashMap<TxHash, TransactionInfo>>,
    receipts: RwLock<HashMap<TxHash, ReceiptInfo>>,
    writes: RwLock<Vec<SubmittedWrite>>,
    write_failure: RwLock<Option<WriteFailure>>,
    write_delay: Option<Duration>,
    auto_confirm: bool,
    counter: AtomicU64,
}

impl MockLedger {
    /// Create a mock for the given chain.
    pub fn new(config: ChainConfig) -> Self {
        Self {
            config,
            available: AtomicBool::new(true),
            transactions: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
            writes: RwLock::new(Vec::new()),
            write_failure: RwLock::new(None),
            write_delay: None,
            auto_confirm: true,
            counter: AtomicU64::new(0),
        }
    }

    /// Add a transaction with an optional mined receipt.
    pub fn with_transaction(
        mut self,
        hash: &str,
        to: Option<&str>,
        status: Option<ReceiptStatus>,
    ) -> Self {
        let hash = TxHash::new(hash);
        self.transactions.get_mut().insert(
            hash.clone(),
            TransactionInfo {
                hash: hash.clone(),
                from: "0x0000000000000000000000000000000000000001".to_string(),
                to: to.map(String::from),
                nonce: 0,
                block_number: status.map(|_| 1),
            },
        );
        if let Some(status) = status {
            self.receipts.get_mut().insert(
                hash.clone(),
                ReceiptInfo {
                    hash,
                    status,
                    block_number: 1,
                    gas_used: 21_000,
                },
            );
        }
        self
    }

    /// Delay every write, to widen race windows in concurrency tests.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Leave submitted writes pending instead of mining them.
    pub fn without_auto_confirm(mut self) -> Self {
        self.auto_confirm = false;
        self
    }

    /// Set availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make subsequent writes fail.
    pub async fn fail_writes(&self, failure: Option<WriteFailure>) {
        *self.write_failure.write().await = failure;
    }

    /// Mine a previously submitted transaction.
    pub async fn confirm(&self, hash: &TxHash, status: ReceiptStatus) {
        if let Some(tx) = self.transactions.write().await.get_mut(hash) {
            tx.block_number = Some(1);
        }
        self.receipts.write().await.insert(
            hash.clone(),
            ReceiptInfo {
                hash: hash.clone(),
                status,
                block_number: 1,
                gas_used: 50_000,
            },
        );
    }

    /// Writes accepted so far.
    pub async fn writes(&self) -> Vec<SubmittedWrite> {
        self.writes.read().await.clone()
    }

    /// Total amount of all accepted transfers.
    pub async fn transferred_total(&self) -> u64 {
        self.writes
            .read()
            .await
            .iter()
            .map(|w| match w {
                SubmittedWrite::Transfer { amount, .. } => *amount,
                SubmittedWrite::Mint { .. } => 0,
            })
            .sum()
    }

    fn next_hash(&self) -> TxHash {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        TxHash::new(format!("{}{:060x}", self.chain_prefix(), n))
    }

    fn chain_prefix(&self) -> String {
        format!("0x{:04x}", self.config.chain_id & 0xffff)
    }

    async fn record_write(&self, to: &str, write: impl FnOnce(TxHash) -> SubmittedWrite) -> Result<TxHash> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger disabled".to_string()));
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.write_failure.read().await;
        let landed = match failure {
            Some(WriteFailure::InsufficientFunds) => {
                return Err(LedgerError::InsufficientFunds("mock signer is empty".to_string()))
            }
            Some(WriteFailure::Unavailable) => {
                return Err(LedgerError::Unavailable("mock rpc down".to_string()))
            }
            Some(WriteFailure::Ambiguous { landed }) => landed,
            None => true,
        };

        let hash = self.next_hash();
        if landed {
            self.writes.write().await.push(write(hash.clone()));
            self.transactions.write().await.insert(
                hash.clone(),
                TransactionInfo {
                    hash: hash.clone(),
                    from: "0x0000000000000000000000000000000000000001".to_string(),
                    to: Some(to.to_string()),
                    nonce: self.counter.load(Ordering::SeqCst),
                    block_number: None,
                },
            );
            if self.auto_confirm {
                self.confirm(&hash, ReceiptStatus::Success).await;
            }
        }

        match failure {
            Some(WriteFailure::Ambiguous { .. }) => Err(LedgerError::Ambiguous {
                tx_hash: hash,
                reason: "mock timeout after broadcast".to_string(),
            }),
            _ => Ok(hash),
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn chain(&self) -> &ChainConfig {
        &self.config
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get_transaction(&self, hash: &TxHash) -> Result<Option<TransactionInfo>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger disabled".to_string()));
        }
        Ok(self.transactions.read().await.get(hash).cloned())
    }

    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<ReceiptInfo>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger disabled".to_string()));
        }
        Ok(self.receipts.read().await.get(hash).cloned())
    }

    async fn transfer(&self, to: &str, amount: u64) -> Result<TxHash> {
        let recipient = to.to_string();
        self.record_write(to, move |tx_hash| SubmittedWrite::Transfer {
            to: recipient,
            amount,
            tx_hash,
        })
        .await
    }

    async fn mint_badge(&self, to: &str, metadata_uri: &str) -> Result<TxHash> {
        let recipient = to.to_string();
        let metadata_uri = metadata_uri.to_string();
        self.record_write(to, move |tx_hash| SubmittedWrite::Mint {
            to: recipient,
            metadata_uri,
            tx_hash,
        })
        .await
    }

    async fn close(&self) {
        self.available.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> MockLedger {
        MockLedger::new(ChainConfig::local("http://localhost:8545", "UNUSED"))
    }

    #[tokio::test]
    async fn test_mock_transfer_is_mined() {
        let ledger = ledger();
        let hash = ledger.transfer("0xabc", 25).await.unwrap();

        let receipt = ledger.get_receipt(&hash).await.unwrap().unwrap();
        assert!(receipt.is_success());
        assert_eq!(ledger.transferred_total().await, 25);
    }

    #[tokio::test]
    async fn test_mock_ambiguous_write() {
        let ledger = ledger();
        ledger
            .fail_writes(Some(WriteFailure::Ambiguous { landed: false }))
            .await;

        let err = ledger.transfer("0xabc", 5).await.unwrap_err();
        let LedgerError::Ambiguous { tx_hash, .. } = err else {
            panic!("expected ambiguous error");
        };
        assert!(ledger.get_transaction(&tx_hash).await.unwrap().is_none());
        assert!(ledger.writes().await.is_empty());
    }

    #[test]
    fn test_mock_unavailable() {
        let ledger = ledger();
        ledger.set_available(false);
        assert!(!tokio_test::block_on(ledger.is_available()));
        tokio_test::assert_err!(tokio_test::block_on(ledger.get_receipt(&TxHash::new("0x01"))));
        tokio_test::assert_err!(tokio_test::block_on(ledger.transfer("0xabc", 1)));
    }
}
