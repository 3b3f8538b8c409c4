use async_trait::async_trait;
use learn_agent::{JudgmentService, TaskContext};
use serde_json::json;
use std::sync::Arc;

use super::Verifier;
use crate::error::VerificationError;
use crate::types::{Proof, Score, Task, VerificationOutcome, VerificationType};

const MAX_SCORE: u32 = 10;

/// Parse `SCORE: <int>/10. FEEDBACK: <text>`.
///
/// Returns the score and the feedback text, or the whole reply when there
/// is no FEEDBACK marker.
pub fn parse_submission_score(reply: &str) -> Result<(u32, String), VerificationError> {
    let upper = reply.to_ascii_uppercase();
    let parse_error = || VerificationError::EvaluationParseError(reply.trim().to_string());

    let start = upper.find("SCORE").ok_or_else(parse_error)?;
    let after = &reply[start + "SCORE".len()..];
    let colon = after.find(':').ok_or_else(parse_error)?;
    let value = after[colon + 1..].trim_start();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, rest) = value.split_at(digits_end);

    // the score must be written out of 10: "7.5/10" or a bare "7" is not a score
    let out_of = rest
        .trim_start()
        .strip_prefix('/')
        .map(str::trim_start)
        .ok_or_else(parse_error)?;
    let denominator_end = out_of
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(out_of.len());
    if out_of[..denominator_end].parse::<u32>() != Ok(MAX_SCORE) {
        return Err(parse_error());
    }

    let score: u32 = digits.parse().map_err(|_| parse_error())?;
    if score > MAX_SCORE {
        return Err(parse_error());
    }

    let feedback = match upper.find("FEEDBACK") {
        Some(i) => reply[i + "FEEDBACK".len()..]
            .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
            .trim_end()
            .to_string(),
        None => reply.trim().to_string(),
    };
    Ok((score, feedback))
}

/// Has the judge score a free-text submission out of 10.
pub struct SubmissionVerifier {
    judge: Arc<dyn JudgmentService>,
    pass_score: u32,
}

impl SubmissionVerifier {
    pub fn new(judge: Arc<dyn JudgmentService>, pass_score: u32) -> Self {
        Self { judge, pass_score }
    }
}

#[async_trait]
impl Verifier for SubmissionVerifier {
    fn verification_type(&self) -> VerificationType {
        VerificationType::Submission
    }

    async fn verify(
        &self,
        task: &Task,
        proof: &Proof,
    ) -> Result<VerificationOutcome, VerificationError> {
        let submission = proof
            .submission
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(VerificationError::MissingProof("submission"))?;

        let context = TaskContext {
            title: &task.title,
            description: &task.description,
        };
        let reply = self.judge.evaluate_submission(context, submission).await?;
        let (value, feedback) = parse_submission_score(&reply)?;

        let score = Score {
            value,
            max: MAX_SCORE,
        };
        let evidence = json!({
            "submission": submission,
            "score": score.to_string(),
            "feedback": feedback,
        });

        let outcome = if value >= self.pass_score {
            VerificationOutcome::pass(feedback, evidence)
        } else {
            VerificationOutcome::fail(feedback, evidence)
        };
        Ok(outcome.with_score(score))
    }
}
