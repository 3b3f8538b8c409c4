//! Core domain types.

use chain_ledger::{ChainId, TxHash};
use chrono::{DateTime, Utc};
use learn_agent::QuizQuestion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::VerificationError;
use crate::progression::level_for_xp;

/// A learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: String,
    /// External identity handle (chat id, username)
    pub handle: String,
    /// One wallet address per chain
    pub wallets: BTreeMap<ChainId, String>,
    /// Cumulative XP, never decreases
    pub xp: u64,
    /// Derived from XP, never decreases
    pub level: u32,
    /// Declared interests; the first one is primary
    pub interests: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(handle: impl Into<String>, interests: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            handle: handle.into(),
            wallets: BTreeMap::new(),
            xp: 0,
            level: level_for_xp(0),
            interests,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_wallet(mut self, chain: impl Into<ChainId>, address: impl Into<String>) -> Self {
        self.wallets.insert(chain.into(), address.into());
        self
    }

    pub fn primary_interest(&self) -> Option<&str> {
        self.interests.first().map(String::as_str)
    }

    pub fn wallet_for(&self, chain: &ChainId) -> Option<&str> {
        self.wallets
            .get(chain)
            .map(String::as_str)
            .filter(|a| !a.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Learning,
    Practice,
    Quest,
    Advanced,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Learning => "learning",
            TaskType::Practice => "practice",
            TaskType::Quest => "quest",
            TaskType::Advanced => "advanced",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof-checking strategy a task requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Quiz,
    Transaction,
    SocialProof,
    Submission,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::Quiz => "quiz",
            VerificationType::Transaction => "transaction",
            VerificationType::SocialProof => "social_proof",
            VerificationType::Submission => "submission",
        }
    }
}

impl FromStr for VerificationType {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "quiz" => Ok(VerificationType::Quiz),
            "transaction" => Ok(VerificationType::Transaction),
            "social_proof" => Ok(VerificationType::SocialProof),
            "submission" => Ok(VerificationType::Submission),
            _ => Err(VerificationError::UnsupportedVerificationType(s.to_string())),
        }
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-chain requirements for transaction tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequirements {
    /// Required recipient, compared case-insensitively
    #[serde(default)]
    pub to_address: Option<String>,
}

/// Strategy-specific data stored on a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationPayload {
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
    /// Answer key, `q1..qN`
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub requirements: TransactionRequirements,
}

/// Task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub verification_type: VerificationType,
    pub xp_reward: u64,
    pub token_reward: u64,
    pub badge_eligible: bool,
    pub min_level: u32,
    pub payload: VerificationPayload,
    /// Chains a reward may be paid on; empty means every configured chain
    pub chains: BTreeSet<ChainId>,
    /// Sponsoring project for quests
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        task_type: TaskType,
        verification_type: VerificationType,
        xp_reward: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            task_type,
            verification_type,
            xp_reward,
            token_reward: xp_reward / 2,
            badge_eligible: false,
            min_level: 1,
            payload: VerificationPayload::default(),
            chains: BTreeSet::new(),
            project: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_token_reward(mut self, amount: u64) -> Self {
        self.token_reward = amount;
        self
    }

    pub fn with_payload(mut self, payload: VerificationPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_chains<I, C>(mut self, chains: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ChainId>,
    {
        self.chains = chains.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports_chain(&self, chain: &ChainId) -> bool {
        self.chains.is_empty() || self.chains.contains(chain)
    }
}

/// Assignment lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Active,
    Verified,
    Failed,
}

impl AssignmentStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, AssignmentStatus::Verified | AssignmentStatus::Failed)
    }
}

/// A task bound to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub status: AssignmentStatus,
    pub path_id: Option<String>,
    /// Order within the path
    pub position: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Strategy-produced evidence
    pub evidence: Option<serde_json::Value>,
    pub reward_claimed: bool,
    pub reward_chain: Option<ChainId>,
    pub reward_tx_hash: Option<TxHash>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(user_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            task_id: task_id.into(),
            status: AssignmentStatus::Pending,
            path_id: None,
            position: 0,
            started_at: None,
            completed_at: None,
            evidence: None,
            reward_claimed: false,
            reward_chain: None,
            reward_tx_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn in_path(mut self, path_id: impl Into<String>, position: u32) -> Self {
        self.path_id = Some(path_id.into());
        self.position = position;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Active,
    Completed,
    Paused,
}

/// Ordered assignments generated together for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPath {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub description: String,
    pub status: PathStatus,
    pub assignment_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A path with its completion counts.
#[derive(Debug, Clone, Serialize)]
pub struct PathProgress {
    pub path: LearningPath,
    pub verified: usize,
    pub total: usize,
}

impl PathProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.verified as f64 / self.total as f64
        }
    }
}

/// Proof submitted for an assignment. Each strategy reads its own field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Proof {
    /// Quiz answers keyed by question id
    pub answers: BTreeMap<String, String>,
    pub transaction_hash: Option<String>,
    /// Chain of the transaction; the default chain when absent
    pub chain: Option<ChainId>,
    pub proof_link: Option<String>,
    pub submission: Option<String>,
}

impl Proof {
    pub fn quiz<I, K, V>(answers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            answers: answers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn transaction(hash: impl Into<String>, chain: Option<ChainId>) -> Self {
        Self {
            transaction_hash: Some(hash.into()),
            chain,
            ..Default::default()
        }
    }

    pub fn social(link: impl Into<String>) -> Self {
        Self {
            proof_link: Some(link.into()),
            ..Default::default()
        }
    }

    pub fn submission(text: impl Into<String>) -> Self {
        Self {
            submission: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Score out of a maximum, rendered `value/max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub value: u32,
    pub max: u32,
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.max)
    }
}

/// Result of running a strategy. Nothing is persisted by the strategy.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub score: Option<Score>,
    /// Human-readable reason
    pub detail: String,
    /// Evidence persisted on the assignment
    pub evidence: serde_json::Value,
    pub explorer_url: Option<String>,
}

impl VerificationOutcome {
    pub fn pass(detail: impl Into<String>, evidence: serde_json::Value) -> Self {
        Self {
            passed: true,
            score: None,
            detail: detail.into(),
            evidence,
            explorer_url: None,
        }
    }

    pub fn fail(detail: impl Into<String>, evidence: serde_json::Value) -> Self {
        Self {
            passed: false,
            ..Self::pass(detail, evidence)
        }
    }

    pub fn with_score(mut self, score: Score) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_explorer_url(mut self, url: String) -> Self {
        self.explorer_url = Some(url);
        self
    }
}

/// A minted badge. At most one per user and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeRecord {
    pub user_id: String,
    pub level: u32,
    pub chain: ChainId,
    pub tx_hash: TxHash,
    pub metadata_uri: String,
    pub minted_at: DateTime<Utc>,
}

/// What an unrecorded reward transaction was paying out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingReward {
    Tokens {
        assignment_ids: Vec<String>,
        /// Whole tokens
        amount: u64,
    },
    Badge { level: u32, metadata_uri: String },
}

/// A reward transaction that may be on chain but is not yet recorded.
///
/// Kept by the store until the transaction is found on chain or known to
/// have been dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingClaim {
    pub user_id: String,
    pub chain: ChainId,
    pub tx_hash: TxHash,
    pub reward: PendingReward,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResult {
    pub chain: ChainId,
    pub tx_hash: TxHash,
    /// Whole tokens
    pub amount: u64,
    pub assignment_ids: Vec<String>,
    pub explorer_url: String,
    /// True when an earlier transaction was found on chain and recorded
    /// instead of sending a new one
    pub reconciled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MintResult {
    pub chain: ChainId,
    pub level: u32,
    pub tx_hash: TxHash,
    pub metadata_uri: String,
    pub explorer_url: String,
    /// True when an earlier mint was found on chain and recorded
    pub reconciled: bool,
}

/// Result of submitting a proof.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub assignment_id: String,
    pub status: AssignmentStatus,
    pub outcome: VerificationOutcome,
    pub xp_earned: u64,
    pub xp: u64,
    pub level: u32,
    pub leveled_up: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_type_parsing() {
        assert_eq!(
            "Social-Proof".parse::<VerificationType>().unwrap(),
            VerificationType::SocialProof
        );
        assert!(matches!(
            "telepathy".parse::<VerificationType>(),
            Err(VerificationError::UnsupportedVerificationType(t)) if t == "telepathy"
        ));
    }

    #[test]
    fn empty_chain_set_supports_all() {
        let task = Task::new("t", TaskType::Quest, VerificationType::Quiz, 50);
        assert!(task.supports_chain(&ChainId::new("gnosis")));

        let task = task.with_chains(["polygon"]);
        assert!(!task.supports_chain(&ChainId::new("gnosis")));
        assert!(task.supports_chain(&ChainId::new("polygon")));
    }

    #[test]
    fn token_reward_defaults_to_half_xp() {
        let task = Task::new("t", TaskType::Learning, VerificationType::Quiz, 15);
        assert_eq!(task.token_reward, 7);
    }

    #[test]
    fn blank_wallet_is_missing() {
        let user = User::new("alice", vec![]).with_wallet("gnosis", "  ");
        assert!(user.wallet_for(&ChainId::new("gnosis")).is_none());
    }

    #[test]
    fn score_display() {
        assert_eq!(Score { value: 2, max: 3 }.to_string(), "2/3");
    }
}
