use async_trait::async_trait;
use serde_json::json;

use super::Verifier;
use crate::error::VerificationError;
use crate::types::{Proof, Score, Task, VerificationOutcome, VerificationType};

/// Grades answers against the task's answer key.
pub struct QuizVerifier {
    pass_percent: u32,
}

impl QuizVerifier {
    pub fn new(pass_percent: u32) -> Self {
        Self { pass_percent }
    }

    fn passes(&self, score: u32, total: u32) -> bool {
        u64::from(score) * 100 >= u64::from(total) * u64::from(self.pass_percent)
    }
}

#[async_trait]
impl Verifier for QuizVerifier {
    fn verification_type(&self) -> VerificationType {
        VerificationType::Quiz
    }

    async fn verify(
        &self,
        task: &Task,
        proof: &Proof,
    ) -> Result<VerificationOutcome, VerificationError> {
        let key = &task.payload.answers;
        if key.is_empty() {
            return Err(VerificationError::MalformedVerificationData(format!(
                "task {} has no answer key",
                task.id
            )));
        }
        let total = u32::try_from(key.len()).map_err(|_| {
            VerificationError::MalformedVerificationData("answer key too large".into())
        })?;

        let score = key
            .iter()
            .filter(|(question, expected)| {
                proof
                    .answers
                    .get(*question)
                    .is_some_and(|given| given.trim() == expected.trim())
            })
            .count() as u32;

        let score = Score { value: score, max: total };
        let evidence = json!({
            "answers": proof.answers,
            "score": score.to_string(),
        });

        let outcome = if self.passes(score.value, score.max) {
            VerificationOutcome::pass(format!("Quiz passed with {score}"), evidence)
        } else {
            VerificationOutcome::fail(format!("Quiz failed with {score}"), evidence)
        };
        Ok(outcome.with_score(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskType, VerificationPayload};

    fn quiz_task(key: &[(&str, &str)]) -> Task {
        let payload = VerificationPayload {
            answers: key
                .iter()
                .map(|(q, a)| (q.to_string(), a.to_string()))
                .collect(),
            ..Default::default()
        };
        Task::new("Wallets 101", TaskType::Learning, VerificationType::Quiz, 15)
            .with_payload(payload)
    }

    #[tokio::test]
    async fn test_two_of_three_fails() {
        let task = quiz_task(&[("q1", "A"), ("q2", "B"), ("q3", "C")]);
        let proof = Proof::quiz([("q1", "A"), ("q2", "B"), ("q3", "D")]);

        let outcome = QuizVerifier::new(70).verify(&task, &proof).await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score.unwrap().to_string(), "2/3");
        assert_eq!(outcome.evidence["score"], "2/3");
    }

    #[tokio::test]
    async fn test_all_correct_passes() {
        let task = quiz_task(&[("q1", "A"), ("q2", "B"), ("q3", "C")]);
        let proof = Proof::quiz([("q1", " A "), ("q2", "B"), ("q3", "C")]);

        let outcome = QuizVerifier::new(70).verify(&task, &proof).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score, Some(Score { value: 3, max: 3 }));
    }

    #[tokio::test]
    async fn test_exact_threshold_passes() {
        let key: Vec<(String, String)> = (1..=10).map(|i| (format!("q{i}"), "A".into())).collect();
        let key_refs: Vec<(&str, &str)> = key.iter().map(|(q, a)| (q.as_str(), a.as_str())).collect();
        let task = quiz_task(&key_refs);
        let proof = Proof::quiz(key_refs.iter().take(7).copied());

        let outcome = QuizVerifier::new(70).verify(&task, &proof).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score.unwrap().to_string(), "7/10");
    }

    #[tokio::test]
    async fn test_empty_key_is_malformed() {
        let task = quiz_task(&[]);
        let result = QuizVerifier::new(70)
            .verify(&task, &Proof::quiz([("q1", "A")]))
            .await;
        assert!(matches!(
            result,
            Err(VerificationError::MalformedVerificationData(_))
        ));
    }
}
