//! Error types for the engine.
//!
//! Input errors and domain-rule violations are reported before any state
//! changes. Collaborator failures keep their source so callers can tell a
//! generation failure from an evaluation failure.

use chain_ledger::{ChainId, LedgerError, TxHash};
use learn_agent::{GenerationError, JudgeError, LlmError};

use crate::types::AssignmentStatus;

/// Failures while checking a proof.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// No strategy is registered for the task's verification type
    #[error("unsupported verification type: {0}")]
    UnsupportedVerificationType(String),

    /// The task's verification payload cannot be evaluated
    #[error("malformed verification data: {0}")]
    MalformedVerificationData(String),

    /// The proof lacks the field this strategy needs
    #[error("missing proof: {0}")]
    MissingProof(&'static str),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    /// Chain lookup failed for a reason other than "not found"
    #[error("chain lookup failed: {0}")]
    Ledger(LedgerError),

    /// The chain did not answer in time
    #[error("chain lookup timed out after {0}ms")]
    Timeout(u64),

    /// The judgment service could not be reached
    #[error(transparent)]
    EvaluationFailed(#[from] JudgeError),

    /// The judgment service answered in an unexpected shape
    #[error("could not parse evaluation: {0}")]
    EvaluationParseError(String),
}

impl From<LedgerError> for VerificationError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UnknownChain(chain) => VerificationError::UnknownChain(chain),
            other => VerificationError::Ledger(other),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProgressionError {
    #[error("negative XP delta: {0}")]
    NegativeXp(i64),

    #[error("XP overflow: {xp} + {delta}")]
    XpOverflow { xp: u64, delta: u64 },
}

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A compare-and-set lost against a concurrent update
    #[error("assignment {id} is {current:?}")]
    Conflict {
        id: String,
        current: AssignmentStatus,
    },

    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// Some assignments in a batch were already marked claimed
    #[error("assignments already claimed: {0:?}")]
    AlreadyMarked(Vec<String>),

    /// The XP change of a resolution was rejected; nothing was written
    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Token claim and badge mint failures.
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("no tokens to claim")]
    NothingToClaim,

    #[error("no wallet configured for chain {0}")]
    NoWalletConfigured(ChainId),

    #[error("level {level} is below the required level {required}")]
    LevelTooLow { level: u32, required: u32 },

    #[error("badge for level {level} already claimed")]
    AlreadyClaimed { level: u32 },

    /// A transaction may have been sent but the claim could not be recorded.
    /// The next claim checks `tx_hash` on chain before sending anything.
    #[error("reward transaction {tx_hash} needs reconciliation: {reason}")]
    ReconciliationRequired { tx_hash: TxHash, reason: String },

    /// An earlier transaction is still neither mined nor dropped
    #[error("earlier reward transaction {0} is still pending")]
    ReconciliationPending(TxHash),

    #[error("total reward overflows")]
    AmountOverflow,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("assignment {id} cannot move from {from:?} to {to:?}")]
    InvalidStateTransition {
        id: String,
        from: AssignmentStatus,
        to: AssignmentStatus,
    },

    #[error("assignment {id} is already {status:?}")]
    AlreadyResolved {
        id: String,
        status: AssignmentStatus,
    },

    #[error("level {level} is below the required level {required}")]
    LevelTooLow { level: u32, required: u32 },

    #[error("task {0} is not a learning task")]
    NotALearningTask(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error(transparent)]
    Reward(#[from] RewardError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The model backend could not be constructed
    #[error("model backend: {0}")]
    Backend(#[from] LlmError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
