//! chain configuration and signer key sources

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

use crate::error::{LedgerError, Result};
use crate::types::TxHash;

/// registry key for a configured chain, e.g. `gnosis`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// where the pre-provisioned signing key lives
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KeySource {
    /// hex private key in a file
    File { path: PathBuf },
    /// hex private key in an environment variable
    Env { var: String },
}

impl KeySource {
    /// read the hex key material; called on every write, never cached
    pub fn resolve(&self) -> Result<Zeroizing<String>> {
        let raw = match self {
            KeySource::File { path } => std::fs::read_to_string(path).map_err(|e| {
                LedgerError::KeyUnavailable(format!("{}: {}", path.display(), e))
            })?,
            KeySource::Env { var } => std::env::var(var)
                .map_err(|_| LedgerError::KeyUnavailable(format!("env var {} not set", var)))?,
        };
        let raw = Zeroizing::new(raw);
        Ok(Zeroizing::new(raw.trim().to_string()))
    }
}

fn default_decimals() -> u8 {
    18
}

fn default_transfer_gas() -> u64 {
    100_000
}

fn default_mint_gas() -> u64 {
    200_000
}

/// static description of one supported chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    /// registry key
    pub id: ChainId,
    /// display name
    pub name: String,
    /// json-rpc http endpoint
    pub rpc_url: String,
    /// eip-155 chain id
    pub chain_id: u64,
    /// erc-20 reward token
    #[serde(default)]
    pub token_contract: Option<String>,
    /// badge nft contract
    #[serde(default)]
    pub nft_contract: Option<String>,
    /// block explorer base url
    pub explorer_url: String,
    /// signing key reference
    pub signer: KeySource,
    /// reward token decimals
    #[serde(default = "default_decimals")]
    pub token_decimals: u8,
    #[serde(default = "default_transfer_gas")]
    pub transfer_gas_limit: u64,
    #[serde(default = "default_mint_gas")]
    pub mint_gas_limit: u64,
}

impl ChainConfig {
    /// gnosis chain with the agent key at its provisioned path
    pub fn gnosis(rpc_url: impl Into<String>) -> Self {
        Self {
            id: ChainId::new("gnosis"),
            name: "Gnosis".into(),
            rpc_url: rpc_url.into(),
            chain_id: 100,
            token_contract: None,
            nft_contract: None,
            explorer_url: "https://gnosisscan.io".into(),
            signer: KeySource::File {
                path: PathBuf::from("/agent_key/ethereum_private_key.txt"),
            },
            token_decimals: default_decimals(),
            transfer_gas_limit: default_transfer_gas(),
            mint_gas_limit: default_mint_gas(),
        }
    }

    /// local dev node (anvil/hardhat)
    pub fn local(rpc_url: impl Into<String>, key_var: impl Into<String>) -> Self {
        Self {
            id: ChainId::new("local"),
            name: "Local".into(),
            rpc_url: rpc_url.into(),
            chain_id: 31337,
            token_contract: None,
            nft_contract: None,
            explorer_url: "http://localhost".into(),
            signer: KeySource::Env { var: key_var.into() },
            token_decimals: default_decimals(),
            transfer_gas_limit: default_transfer_gas(),
            mint_gas_limit: default_mint_gas(),
        }
    }

    pub fn with_token_contract(mut self, address: impl Into<String>) -> Self {
        self.token_contract = Some(address.into());
        self
    }

    pub fn with_nft_contract(mut self, address: impl Into<String>) -> Self {
        self.nft_contract = Some(address.into());
        self
    }

    pub fn explorer_tx_url(&self, hash: &TxHash) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), hash)
    }
}

/// rpc transport tuning shared by all chains
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcConfig {
    /// per-request timeout in seconds
    pub timeout_secs: u64,
    /// attempts for read calls
    pub retry_attempts: u32,
    /// first backoff delay, doubled per attempt
    pub retry_base_delay_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}
