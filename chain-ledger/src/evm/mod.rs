//! EVM chains over Ethereum JSON-RPC.

pub mod client;
pub mod rpc;
pub mod tx;

pub use client::EvmLedger;
pub use tx::Signer;
