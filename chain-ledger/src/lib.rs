//! Chain Ledger - reward payouts on EVM chains
//!
//! Provides per-chain ledger clients for the Learn & Earn engine:
//! - Transaction and receipt lookups for on-chain task verification
//! - ERC-20 reward transfers and badge NFT mints signed locally
//! - A registry mapping chain ids to clients, with a default chain
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            ChainRegistry                │
//! │   (chain id -> Arc<dyn LedgerClient>)   │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌─────────────┐       ┌─────────────┐
//! │  EvmLedger  │       │ MockLedger  │
//! │ (json-rpc)  │       │ (in-memory) │
//! └─────────────┘       └─────────────┘
//! ```

pub mod config;
pub mod error;
pub mod evm;
pub mod mock;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::{ChainConfig, ChainId, KeySource, RpcConfig};
pub use error::{LedgerError, Result};
pub use evm::EvmLedger;
pub use mock::{MockLedger, SubmittedWrite, WriteFailure};
pub use registry::ChainRegistry;
pub use traits::LedgerClient;
pub use types::{parse_address, same_address, ReceiptInfo, ReceiptStatus, TransactionInfo, TxHash};
