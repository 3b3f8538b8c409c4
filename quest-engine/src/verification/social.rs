use async_trait::async_trait;
use learn_agent::{JudgmentService, TaskContext};
use serde_json::json;
use std::sync::Arc;

use super::Verifier;
use crate::error::VerificationError;
use crate::types::{Proof, Task, VerificationOutcome, VerificationType};

/// True when one of the first `scan` whitespace tokens of `reply` is `YES`,
/// ignoring case and surrounding punctuation.
///
/// "Yes, the post shows..." is a yes; "The answer is yes" with `scan = 3`
/// is not.
pub fn social_verdict(reply: &str, scan: usize) -> bool {
    reply
        .split_whitespace()
        .take(scan)
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|token| token.eq_ignore_ascii_case("YES"))
}

/// Asks the judge whether a link proves the task was done.
pub struct SocialProofVerifier {
    judge: Arc<dyn JudgmentService>,
    scan_tokens: usize,
}

impl SocialProofVerifier {
    pub fn new(judge: Arc<dyn JudgmentService>, scan_tokens: usize) -> Self {
        Self { judge, scan_tokens }
    }
}

#[async_trait]
impl Verifier for SocialProofVerifier {
    fn verification_type(&self) -> VerificationType {
        VerificationType::SocialProof
    }

    async fn verify(
        &self,
        task: &Task,
        proof: &Proof,
    ) -> Result<VerificationOutcome, VerificationError> {
        let link = proof
            .proof_link
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(VerificationError::MissingProof("proof link"))?;

        let context = TaskContext {
            title: &task.title,
            description: &task.description,
        };
        let reply = self.judge.judge_social_proof(context, link).await?;

        let evidence = json!({
            "proof_link": link,
            "judgment": reply,
        });
        let detail = reply.trim().to_string();
        if social_verdict(&reply, self.scan_tokens) {
            Ok(VerificationOutcome::pass(detail, evidence))
        } else {
            Ok(VerificationOutcome::fail(detail, evidence))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskType;
    use crate::verification::test_support::FixedJudge;
    use learn_agent::{AgentService, LlmBackend, LlmJudge, MockBackend};

    fn task() -> Task {
        Task::new("Share your badge", TaskType::Quest, VerificationType::SocialProof, 50)
            .with_description("Post your badge on social media")
    }

    #[test]
    fn verdict_parsing() {
        assert!(social_verdict("YES - the post is public", 3));
        assert!(social_verdict("yes.", 3));
        assert!(social_verdict("Verdict: YES", 3));
        assert!(!social_verdict("NO, the link is broken", 3));
        assert!(!social_verdict("YESTERDAY it was posted", 3));
        assert!(!social_verdict("The answer is yes", 3));
        assert!(!social_verdict("", 3));
    }

    #[tokio::test]
    async fn test_yes_passes() {
        let judge = Arc::new(FixedJudge::new("YES. The post matches the task."));
        let verifier = SocialProofVerifier::new(judge.clone(), 3);

        let outcome = verifier
            .verify(&task(), &Proof::social("https://x.com/alice/status/1"))
            .await
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(judge.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_link_skips_judge() {
        let judge = Arc::new(FixedJudge::new("YES"));
        let verifier = SocialProofVerifier::new(judge.clone(), 3);

        let result = verifier.verify(&task(), &Proof::social("   ")).await;
        assert!(matches!(result, Err(VerificationError::MissingProof(_))));
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_judge_is_evaluation_failure() {
        let backend: Arc<dyn LlmBackend> = Arc::new(MockBackend::default().with_available(false));
        let agent = Arc::new(AgentService::new(vec![backend]));
        let verifier = SocialProofVerifier::new(Arc::new(LlmJudge::new(agent)), 3);

        let result = verifier
            .verify(&task(), &Proof::social("https://x.com/alice/status/1"))
            .await;
        assert!(matches!(result, Err(VerificationError::EvaluationFailed(_))));
    }
}
