//! Quest Engine - verification and reward issuance for Learn & Earn
//!
//! Turns learner activity into progression and on-chain rewards:
//! - Generates tasks and learning paths from a learner's interests
//! - Verifies proofs by quiz, on-chain transaction, social proof or
//!   free-text submission
//! - Applies XP exactly once per verified assignment
//! - Pays token rewards in batches and mints level badges
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────┐
//!                 │        QuestEngine        │
//!                 └──┬──────────┬──────────┬──┘
//!                    │          │          │
//!        ┌───────────▼───┐ ┌────▼─────┐ ┌──▼──────────────┐
//!        │VerifierRegistry│ │  Store   │ │RewardDispatcher │
//!        │ quiz / tx /    │ │(CAS +    │ │(per-user locks, │
//!        │ social / subm. │ │ claims)  │ │ reconciliation) │
//!        └──┬─────────┬───┘ └──────────┘ └────────┬────────┘
//!           │         │                           │
//!    ┌──────▼───┐ ┌───▼───────────┐        ┌──────▼───────┐
//!    │LlmJudge  │ │ChainRegistry  │◄───────┤ LedgerClient │
//!    │(learn-   │ │(chain-ledger) │        │ per chain    │
//!    │ agent)   │ └───────────────┘        └──────────────┘
//!    └──────────┘
//! ```
//!
//! # Invariants
//!
//! - An assignment reaches `verified` or `failed` exactly once
//! - A token reward is paid at most once per assignment
//! - A badge is minted at most once per user and level
//! - XP and level never decrease

pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod progression;
pub mod rewards;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod verification;

pub use config::{ConfigError, EngineConfig};
pub use error::{
    EngineError, ProgressionError, Result, RewardError, StoreError, VerificationError,
};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError};
pub use orchestrator::{CurrentTask, Lesson, OnboardResult, ProjectQuest, QuestEngine};
pub use progression::{apply_xp, level_for_xp, LevelChange, XP_PER_LEVEL};
pub use rewards::{RewardDispatcher, UserLocks};
pub use store::{InMemoryStore, Resolution, StatusUpdate, Store};
pub use types::*;
pub use verification::{Verifier, VerifierRegistry};
