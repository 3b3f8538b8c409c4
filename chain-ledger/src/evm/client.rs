//! evm ledger client over json-rpc

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::config::{ChainConfig, RpcConfig};
use crate::error::{LedgerError, Result};
use crate::evm::rpc::RpcTransport;
use crate::evm::tx::{erc20_transfer_data, mint_badge_data, LegacyTx, Signer};
use crate::traits::LedgerClient;
use crate::types::{
    parse_address, parse_quantity, to_base_units, ReceiptInfo, ReceiptStatus, TransactionInfo,
    TxHash,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    nonce: String,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
    block_number: Option<String>,
    gas_used: Option<String>,
}

/// ledger client for one evm chain
pub struct EvmLedger {
    config: ChainConfig,
    rpc: RpcTransport,
    // serializes nonce read -> sign -> submit for this chain's signer
    nonce_lock: Mutex<()>,
    closed: AtomicBool,
}

impl EvmLedger {
    pub fn new(config: ChainConfig, rpc_config: RpcConfig) -> Result<Self> {
        let rpc = RpcTransport::new(config.rpc_url.clone(), rpc_config)?;
        Ok(Self {
            config,
            rpc,
            nonce_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// open the client and check the node serves the configured chain
    pub async fn connect(config: ChainConfig, rpc_config: RpcConfig) -> Result<Self> {
        let ledger = Self::new(config, rpc_config)?;
        let reported: String = ledger.rpc.call_with_retry("eth_chainId", json!([])).await?;
        let reported = parse_quantity(&reported)? as u64;

        if reported != ledger.config.chain_id {
            return Err(LedgerError::ChainIdMismatch {
                configured: ledger.config.chain_id,
                reported,
            });
        }

        tracing::info!(
            chain = %ledger.config.id,
            rpc = %ledger.rpc.url(),
            chain_id = reported,
            "ledger client connected"
        );
        Ok(ledger)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LedgerError::Closed)
        } else {
            Ok(())
        }
    }

    async fn send_contract_call(
        &self,
        contract: &str,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> Result<TxHash> {
        self.ensure_open()?;
        let signer = Signer::resolve(&self.config.signer)?;
        let contract = parse_address(contract)?;

        let _nonce_guard = self.nonce_lock.lock().await;

        let nonce: String = self
            .rpc
            .call_with_retry(
                "eth_getTransactionCount",
                json!([signer.address_hex(), "pending"]),
            )
            .await?;
        let gas_price: String = self.rpc.call_with_retry("eth_gasPrice", json!([])).await?;

        let tx = LegacyTx {
            nonce: parse_quantity(&nonce)? as u64,
            gas_price: parse_quantity(&gas_price)?,
            gas_limit,
            to: contract,
            value: 0,
            data,
            chain_id: self.config.chain_id,
        };
        let signed = tx.sign(&signer)?;

        tracing::debug!(
            chain = %self.config.id,
            nonce = tx.nonce,
            tx_hash = %signed.hash,
            "submitting signed transaction"
        );

        self.rpc
            .call::<String>("eth_sendRawTransaction", json!([signed.raw_hex()]))
            .await
            .map(TxHash::new)
            .map_err(|e| submission_error(e, signed.hash))
    }
}

/// Once the raw transaction has been sent, only an explicit refusal from the
/// node is a definite failure. Anything else may have been broadcast.
fn submission_error(error: LedgerError, tx_hash: TxHash) -> LedgerError {
    match error {
        LedgerError::Rejected(ref message) if message.to_ascii_lowercase().contains("already known") => {
            LedgerError::Ambiguous {
                tx_hash,
                reason: error.to_string(),
            }
        }
        LedgerError::Rpc { .. } | LedgerError::Rejected(_) | LedgerError::InsufficientFunds(_) => error,
        other => LedgerError::Ambiguous {
            tx_hash,
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl LedgerClient for EvmLedger {
    fn chain(&self) -> &ChainConfig {
        &self.config
    }

    async fn is_available(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.rpc
            .call::<String>("eth_chainId", json!([]))
            .await
            .is_ok()
    }

    async fn get_transaction(&self, hash: &TxHash) -> Result<Option<TransactionInfo>> {
        self.ensure_open()?;
        let raw: Option<RawTransaction> = self
            .rpc
            .call_with_retry("eth_getTransactionByHash", json!([hash.as_str()]))
            .await?;

        raw.map(|tx| {
            Ok(TransactionInfo {
                hash: TxHash::new(tx.hash),
                from: tx.from,
                to: tx.to,
                nonce: parse_quantity(&tx.nonce)? as u64,
                block_number: tx
                    .block_number
                    .map(|b| parse_quantity(&b).map(|n| n as u64))
                    .transpose()?,
            })
        })
        .transpose()
    }

    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<ReceiptInfo>> {
        self.ensure_open()?;
        let raw: Option<RawReceipt> = self
            .rpc
            .call_with_retry("eth_getTransactionReceipt", json!([hash.as_str()]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        // some nodes return a receipt stub for pending transactions
        let Some(block_number) = raw.block_number else {
            return Ok(None);
        };

        let status = match raw.status.as_deref() {
            Some("0x1") => ReceiptStatus::Success,
            _ => ReceiptStatus::Reverted,
        };

        Ok(Some(ReceiptInfo {
            hash: TxHash::new(raw.transaction_hash),
            status,
            block_number: parse_quantity(&block_number)? as u64,
            gas_used: raw
                .gas_used
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .unwrap_or(0) as u64,
        }))
    }

    async fn transfer(&self, to: &str, amount: u64) -> Result<TxHash> {
        let contract = self
            .config
            .token_contract
            .as_deref()
            .ok_or(LedgerError::ContractNotConfigured("token"))?;
        let recipient = parse_address(to)?;
        let base_units = to_base_units(amount, self.config.token_decimals)?;

        let hash = self
            .send_contract_call(
                contract,
                erc20_transfer_data(&recipient, base_units),
                self.config.transfer_gas_limit,
            )
            .await?;

        tracing::info!(chain = %self.config.id, to, amount, tx_hash = %hash, "token transfer submitted");
        Ok(hash)
    }

    async fn mint_badge(&self, to: &str, metadata_uri: &str) -> Result<TxHash> {
        let contract = self
            .config
            .nft_contract
            .as_deref()
            .ok_or(LedgerError::ContractNotConfigured("nft"))?;
        let recipient = parse_address(to)?;

        let hash = self
            .send_contract_call(
                contract,
                mint_badge_data(&recipient, metadata_uri),
                self.config.mint_gas_limit,
            )
            .await?;

        tracing::info!(chain = %self.config.id, to, metadata_uri, tx_hash = %hash, "badge mint submitted");
        Ok(hash)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(chain = %self.config.id, "ledger client closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::tx::keccak256;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEV_KEY_VAR: &str = "CHAIN_LEDGER_EVM_TEST_KEY";
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn chain_for(server: &MockServer) -> ChainConfig {
        ChainConfig::local(server.uri(), DEV_KEY_VAR)
            .with_token_contract("0x5FbDB2315678afecb367f032d93F642f64180aa3")
            .with_nft_contract("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512")
    }

    fn fast_rpc() -> RpcConfig {
        RpcConfig {
            timeout_secs: 5,
            retry_attempts: 2,
            retry_base_delay_ms: 1,
        }
    }

    async fn rpc_result(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": result
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_connect_rejects_wrong_chain() {
        let server = MockServer::start().await;
        rpc_result(&server, "eth_chainId", json!("0x64")).await;

        let result = EvmLedger::connect(chain_for(&server), fast_rpc()).await;
        assert!(matches!(
            result,
            Err(LedgerError::ChainIdMismatch { configured: 31337, reported: 100 })
        ));
    }

    #[tokio::test]
    async fn test_receipt_status_parsing() {
        let server = MockServer::start().await;
        rpc_result(
            &server,
            "eth_getTransactionReceipt",
            json!({
                "transactionHash": "0xAB",
                "status": "0x0",
                "blockNumber": "0x10",
                "gasUsed": "0x5208"
            }),
        )
        .await;

        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        let receipt = ledger.get_receipt(&TxHash::new("0xab")).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Reverted);
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21_000);
    }

    #[tokio::test]
    async fn test_missing_transaction_is_none() {
        let server = MockServer::start().await;
        rpc_result(&server, "eth_getTransactionByHash", json!(null)).await;

        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        let tx = ledger.get_transaction(&TxHash::new("0x01")).await.unwrap();
        assert!(tx.is_none());
    }

    #[tokio::test]
    async fn test_transfer_signs_and_submits() {
        std::env::set_var(DEV_KEY_VAR, DEV_KEY);
        let server = MockServer::start().await;
        rpc_result(&server, "eth_getTransactionCount", json!("0x3")).await;
        rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
        rpc_result(&server, "eth_sendRawTransaction", json!("0xFEED")).await;

        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        let hash = ledger
            .transfer("0x70997970C51812dc3A010C7d01b50e0d17dc79C8", 25)
            .await
            .unwrap();
        assert_eq!(hash, TxHash::new("0xfeed"));
    }

    fn rpc_methods(requests: &[wiremock::Request]) -> Vec<String> {
        requests
            .iter()
            .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
            .filter_map(|body| body["method"].as_str().map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn test_garbled_send_reply_is_ambiguous() {
        std::env::set_var(DEV_KEY_VAR, DEV_KEY);
        let server = MockServer::start().await;
        rpc_result(&server, "eth_getTransactionCount", json!("0x3")).await;
        rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_sendRawTransaction" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        let result = ledger
            .transfer("0x70997970C51812dc3A010C7d01b50e0d17dc79C8", 25)
            .await;
        let Err(LedgerError::Ambiguous { tx_hash, .. }) = result else {
            panic!("expected an ambiguous submission");
        };

        // the hash handed back is the one of the bytes that went out
        let requests = server.received_requests().await.unwrap();
        let sent = requests
            .iter()
            .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
            .find(|body| body["method"] == "eth_sendRawTransaction")
            .unwrap();
        let raw = hex::decode(sent["params"][0].as_str().unwrap().trim_start_matches("0x")).unwrap();
        assert_eq!(tx_hash, TxHash::from_bytes(&keccak256(&raw)));
    }

    #[tokio::test]
    async fn test_node_rejection_is_definite() {
        std::env::set_var(DEV_KEY_VAR, DEV_KEY);
        let server = MockServer::start().await;
        rpc_result(&server, "eth_getTransactionCount", json!("0x3")).await;
        rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_sendRawTransaction" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": -32000, "message": "nonce too low" }
            })))
            .mount(&server)
            .await;

        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        let result = ledger
            .transfer("0x70997970C51812dc3A010C7d01b50e0d17dc79C8", 25)
            .await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_writes_on_one_signer_do_not_interleave() {
        std::env::set_var(DEV_KEY_VAR, DEV_KEY);
        let server = MockServer::start().await;
        rpc_result(&server, "eth_getTransactionCount", json!("0x3")).await;
        rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_sendRawTransaction" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xFEED" }))
                    .set_delay(std::time::Duration::from_millis(150)),
            )
            .mount(&server)
            .await;

        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        let to = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
        let (first, second) = tokio::join!(ledger.transfer(to, 1), ledger.transfer(to, 2));
        assert!(first.is_ok() && second.is_ok());

        let requests = server.received_requests().await.unwrap();
        let sequence: Vec<String> = rpc_methods(&requests)
            .into_iter()
            .filter(|m| m == "eth_getTransactionCount" || m == "eth_sendRawTransaction")
            .collect();
        assert_eq!(
            sequence,
            [
                "eth_getTransactionCount",
                "eth_sendRawTransaction",
                "eth_getTransactionCount",
                "eth_sendRawTransaction",
            ]
        );
    }

    #[tokio::test]
    async fn test_transfer_without_token_contract() {
        let server = MockServer::start().await;
        let mut chain = chain_for(&server);
        chain.token_contract = None;

        let ledger = EvmLedger::new(chain, fast_rpc()).unwrap();
        let result = ledger
            .transfer("0x70997970C51812dc3A010C7d01b50e0d17dc79C8", 1)
            .await;
        assert!(matches!(result, Err(LedgerError::ContractNotConfigured("token"))));
    }

    #[tokio::test]
    async fn test_closed_client_refuses_calls() {
        let server = MockServer::start().await;
        let ledger = EvmLedger::new(chain_for(&server), fast_rpc()).unwrap();
        ledger.close().await;

        assert!(!ledger.is_available().await);
        assert!(matches!(
            ledger.get_receipt(&TxHash::new("0x01")).await,
            Err(LedgerError::Closed)
        ));
    }
}
