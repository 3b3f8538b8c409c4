//! Verification strategies.
//!
//! One verifier per `VerificationType`, dispatched through a registry.
//! Verifiers only read: persisting the outcome is the orchestrator's job.

mod quiz;
mod social;
mod submission;
mod transaction;

pub use quiz::QuizVerifier;
pub use social::{social_verdict, SocialProofVerifier};
pub use submission::{parse_submission_score, SubmissionVerifier};
pub use transaction::TransactionVerifier;

use async_trait::async_trait;
use chain_ledger::ChainRegistry;
use learn_agent::JudgmentService;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::VerificationConfig;
use crate::error::VerificationError;
use crate::types::{Proof, Task, VerificationOutcome, VerificationType};

/// Checks a proof against a task.
#[async_trait]
pub trait Verifier: Send + Sync {
    fn verification_type(&self) -> VerificationType;

    async fn verify(&self, task: &Task, proof: &Proof)
        -> Result<VerificationOutcome, VerificationError>;
}

/// Verifiers keyed by the type they handle.
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<VerificationType, Arc<dyn Verifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all four built-in strategies.
    pub fn standard(
        chains: Arc<ChainRegistry>,
        judge: Arc<dyn JudgmentService>,
        config: &VerificationConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(QuizVerifier::new(config.quiz_pass_percent)));
        registry.register(Arc::new(TransactionVerifier::new(
            chains,
            config.chain_timeout_ms,
        )));
        registry.register(Arc::new(SocialProofVerifier::new(
            judge.clone(),
            config.verdict_scan_tokens,
        )));
        registry.register(Arc::new(SubmissionVerifier::new(
            judge,
            config.submission_pass_score,
        )));
        registry
    }

    /// Register a verifier, replacing any previous one for its type.
    pub fn register(&mut self, verifier: Arc<dyn Verifier>) {
        self.verifiers.insert(verifier.verification_type(), verifier);
    }

    pub fn supports(&self, verification_type: VerificationType) -> bool {
        self.verifiers.contains_key(&verification_type)
    }

    pub async fn verify(
        &self,
        task: &Task,
        proof: &Proof,
    ) -> Result<VerificationOutcome, VerificationError> {
        let verifier = self.verifiers.get(&task.verification_type).ok_or_else(|| {
            VerificationError::UnsupportedVerificationType(task.verification_type.to_string())
        })?;

        let outcome = verifier.verify(task, proof).await?;
        debug!(
            task_id = %task.id,
            verification_type = %task.verification_type,
            passed = outcome.passed,
            "Proof checked"
        );
        Ok(outcome)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskType;
    use test_support::FixedJudge;

    #[tokio::test]
    async fn test_unregistered_type_is_unsupported() {
        let registry = VerifierRegistry::new();
        let task = Task::new("Post", TaskType::Quest, VerificationType::SocialProof, 50);

        let result = registry.verify(&task, &Proof::social("https://x.com/p/1")).await;
        assert!(matches!(
            result,
            Err(VerificationError::UnsupportedVerificationType(t)) if t == "social_proof"
        ));
    }

    #[tokio::test]
    async fn test_standard_registry_covers_every_type() {
        let chains = Arc::new(ChainRegistry::new("gnosis"));
        let judge: Arc<dyn JudgmentService> = Arc::new(FixedJudge::new("YES"));
        let registry = VerifierRegistry::standard(chains, judge, &VerificationConfig::default());

        for t in [
            VerificationType::Quiz,
            VerificationType::Transaction,
            VerificationType::SocialProof,
            VerificationType::Submission,
        ] {
            assert!(registry.supports(t), "{t} not registered");
        }
    }
}
