//! Chain registry.
//!
//! Maps chain identifiers to ledger clients. Built once at startup and
//! read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ChainConfig, ChainId, RpcConfig};
use crate::error::{LedgerError, Result};
use crate::evm::EvmLedger;
use crate::traits::LedgerClient;

/// Registry of ledger clients keyed by chain id.
pub struct ChainRegistry {
    default_chain: ChainId,
    clients: HashMap<ChainId, Arc<dyn LedgerClient>>,
}

impl ChainRegistry {
    /// Create an empty registry with the given default chain.
    pub fn new(default_chain: impl Into<ChainId>) -> Self {
        Self {
            default_chain: default_chain.into(),
            clients: HashMap::new(),
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_client(mut self, client: Arc<dyn LedgerClient>) -> Self {
        self.register(client);
        self
    }

    /// Register a client under its chain id, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn LedgerClient>) {
        let id = client.chain().id.clone();
        tracing::debug!(chain = %id, "registered ledger client");
        self.clients.insert(id, client);
    }

    /// Connect an EVM client for every configured chain.
    ///
    /// Fails if any chain cannot be reached or the default chain is not
    /// among the configured ones.
    pub async fn connect(
        chains: &[ChainConfig],
        default_chain: &ChainId,
        rpc_config: &RpcConfig,
    ) -> Result<Self> {
        let mut registry = Self::new(default_chain.clone());
        for chain in chains {
            let client = EvmLedger::connect(chain.clone(), rpc_config.clone()).await?;
            registry.register(Arc::new(client));
        }

        if !registry.clients.contains_key(default_chain) {
            return Err(LedgerError::UnknownChain(default_chain.to_string()));
        }

        tracing::info!(
            chains = registry.clients.len(),
            default = %default_chain,
            "chain registry ready"
        );
        Ok(registry)
    }

    /// Client for a chain id.
    pub fn get(&self, chain: &ChainId) -> Result<Arc<dyn LedgerClient>> {
        self.clients
            .get(chain)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownChain(chain.to_string()))
    }

    /// Client for an optional chain id, falling back to the default.
    pub fn resolve(&self, chain: Option<&ChainId>) -> Result<Arc<dyn LedgerClient>> {
        self.get(chain.unwrap_or(&self.default_chain))
    }

    pub fn default_chain(&self) -> &ChainId {
        &self.default_chain
    }

    /// Registered chain ids, sorted.
    pub fn chains(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every client.
    pub async fn shutdown(&self) {
        let closing = self.clients.values().map(|client| client.close());
        futures::future::join_all(closing).await;
        tracing::info!("chain registry shut down");
    }
}
