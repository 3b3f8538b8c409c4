use async_trait::async_trait;
use chain_ledger::{same_address, ChainRegistry, ReceiptStatus, TxHash};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::Verifier;
use crate::error::VerificationError;
use crate::types::{Proof, Task, VerificationOutcome, VerificationType};

/// Looks the proof's transaction up on chain.
///
/// Only existence, receipt status and recipient are checked.
pub struct TransactionVerifier {
    chains: Arc<ChainRegistry>,
    timeout_ms: u64,
}

impl TransactionVerifier {
    pub fn new(chains: Arc<ChainRegistry>, timeout_ms: u64) -> Self {
        Self { chains, timeout_ms }
    }
}

#[async_trait]
impl Verifier for TransactionVerifier {
    fn verification_type(&self) -> VerificationType {
        VerificationType::Transaction
    }

    async fn verify(
        &self,
        task: &Task,
        proof: &Proof,
    ) -> Result<VerificationOutcome, VerificationError> {
        let hash = proof
            .transaction_hash
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or(VerificationError::MissingProof("transaction hash"))?;
        let hash = TxHash::new(hash);

        let client = self.chains.resolve(proof.chain.as_ref())?;
        let chain = client.chain().id.clone();

        let lookup = async {
            let tx = client.get_transaction(&hash).await?;
            let receipt = match tx {
                Some(_) => client.get_receipt(&hash).await?,
                None => None,
            };
            Ok::<_, VerificationError>((tx, receipt))
        };
        let (tx, receipt) = tokio::time::timeout(Duration::from_millis(self.timeout_ms), lookup)
            .await
            .map_err(|_| {
                warn!(%chain, tx_hash = %hash, "Transaction lookup timed out");
                VerificationError::Timeout(self.timeout_ms)
            })??;

        let evidence = |reason: &str| {
            json!({
                "transaction_hash": hash,
                "chain": chain,
                "reason": reason,
            })
        };

        let (tx, receipt) = match (tx, receipt) {
            (Some(tx), Some(receipt)) => (tx, receipt),
            _ => {
                return Ok(VerificationOutcome::fail(
                    "Transaction not found",
                    evidence("not_found"),
                ))
            }
        };

        if receipt.status != ReceiptStatus::Success {
            return Ok(VerificationOutcome::fail(
                "Transaction failed",
                evidence("reverted"),
            ));
        }

        if let Some(required) = task.payload.requirements.to_address.as_deref() {
            let matches = tx.to.as_deref().is_some_and(|to| same_address(to, required));
            if !matches {
                return Ok(VerificationOutcome::fail(
                    "Wrong recipient address",
                    evidence("wrong_recipient"),
                ));
            }
        }

        let explorer_url = client.chain().explorer_tx_url(&hash);
        let evidence = json!({
            "transaction_hash": hash,
            "chain": chain,
            "block_number": receipt.block_number,
            "explorer_url": explorer_url,
        });
        Ok(VerificationOutcome::pass("Transaction verified", evidence)
            .with_explorer_url(explorer_url))
    }
}
