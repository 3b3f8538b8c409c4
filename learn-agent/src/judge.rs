//! Judgment service.
//!
//! Asks the model whether a social proof link or a free-text submission
//! satisfies a task. Responses are returned verbatim; interpreting the
//! verdict or score is left to the verification layer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::audit::Purpose;
use crate::backend::CompletionRequest;
use crate::service::{AgentService, ServiceError};

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    /// The model could not be reached or did not answer in time
    #[error("evaluation failed: {0}")]
    EvaluationFailed(#[from] ServiceError),
}

/// Task context shown to the judge.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub title: &'a str,
    pub description: &'a str,
}

/// Judges proofs of task completion.
#[async_trait]
pub trait JudgmentService: Send + Sync {
    /// Ask whether `proof_link` is valid evidence. The expected reply starts
    /// with YES or NO followed by a short reason.
    async fn judge_social_proof(
        &self,
        task: TaskContext<'_>,
        proof_link: &str,
    ) -> Result<String, JudgeError>;

    /// Score a submission. The expected reply is
    /// `SCORE: <int>/10. FEEDBACK: ...`.
    async fn evaluate_submission(
        &self,
        task: TaskContext<'_>,
        submission: &str,
    ) -> Result<String, JudgeError>;
}

const SOCIAL_PROOF_SYSTEM: &str = "You are verifying task completion evidence.";
const SUBMISSION_SYSTEM: &str = "You are an expert Web3 educator evaluating submissions.";

/// Model-backed judge.
pub struct LlmJudge {
    agent: Arc<AgentService>,
}

impl LlmJudge {
    pub fn new(agent: Arc<AgentService>) -> Self {
        Self { agent }
    }
}

fn social_proof_prompt(task: TaskContext<'_>, proof_link: &str) -> String {
    format!(
        "Verify this social proof for a Web3 task completion:\n\
         Task: {}\n\
         Requirement: {}\n\
         Provided proof: {}\n\n\
         Is this valid proof of task completion? Answer only YES or NO and explain briefly why.",
        task.title, task.description, proof_link
    )
}

fn submission_prompt(task: TaskContext<'_>, submission: &str) -> String {
    format!(
        "Evaluate this submission for a Web3 task:\n\
         Task: {}\n\
         Requirements: {}\n\n\
         User Submission:\n```\n{}\n```\n\n\
         Score this submission from 0-10 and explain your reasoning.\n\
         Format response as: SCORE: X/10. FEEDBACK: Your detailed feedback here.",
        task.title, task.description, submission
    )
}

#[async_trait]
impl JudgmentService for LlmJudge {
    async fn judge_social_proof(
        &self,
        task: TaskContext<'_>,
        proof_link: &str,
    ) -> Result<String, JudgeError> {
        let request = CompletionRequest::user(social_proof_prompt(task, proof_link))
            .with_system(SOCIAL_PROOF_SYSTEM)
            .with_temperature(0.0)
            .with_max_tokens(200);

        let response = self
            .agent
            .invoke(Purpose::SocialProofJudgment, task.title, request)
            .await?;
        Ok(response.content)
    }

    async fn evaluate_submission(
        &self,
        task: TaskContext<'_>,
        submission: &str,
    ) -> Result<String, JudgeError> {
        let request = CompletionRequest::user(submission_prompt(task, submission))
            .with_system(SUBMISSION_SYSTEM)
            .with_temperature(0.0)
            .with_max_tokens(500);

        let response = self
            .agent
            .invoke(Purpose::SubmissionJudgment, task.title, request)
            .await?;
        Ok(response.content)
    }
}
