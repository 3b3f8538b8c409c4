//! Audit trail for model invocations.
//!
//! Every judgment and generation call is recorded with its purpose, the
//! backend that served it, token usage and outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend::Usage;

/// Maximum entries in the audit log before pruning.
const MAX_AUDIT_ENTRIES: usize = 10_000;

/// Why the model was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    SocialProofJudgment,
    SubmissionJudgment,
    TaskGeneration,
    QuizGeneration,
    LessonGeneration,
    PathSummary,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AuditOutcome {
    Completed {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    Failed {
        error: String,
    },
    TimedOut,
}

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub entry_id: String,
    /// Why the call was made
    pub purpose: Purpose,
    /// What the call was about (task title, topic)
    pub subject: String,
    /// Backend that served the call
    pub model: Option<String>,
    /// Outcome, once known
    pub outcome: Option<AuditOutcome>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Processing duration in ms
    pub duration_ms: Option<u64>,
}

impl AuditEntry {
    fn new(purpose: Purpose, subject: &str) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            purpose,
            subject: subject.to_string(),
            model: None,
            outcome: None,
            requested_at: Utc::now(),
            responded_at: None,
            duration_ms: None,
        }
    }
}

/// Audit log for tracking all model invocations.
pub struct AuditLog {
    /// Log entries (newest first)
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
    /// Maximum entries to retain
    max_entries: usize,
}

impl AuditLog {
    /// Create a new audit log.
    pub fn new() -> Self {
        Self::with_max_entries(MAX_AUDIT_ENTRIES)
    }

    /// Create with custom max entries.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }

    /// Log a request (before processing).
    pub async fn log_request(&self, purpose: Purpose, subject: &str) -> String {
        let entry = AuditEntry::new(purpose, subject);
        let entry_id = entry.entry_id.clone();

        let mut entries = self.entries.write().await;
        entries.push_front(entry);

        // Prune if over limit
        while entries.len() > self.max_entries {
            entries.pop_back();
        }

        entry_id
    }

    /// Record a completed call.
    pub async fn log_completion(&self, entry_id: &str, model: &str, usage: &Usage) {
        self.finish(
            entry_id,
            Some(model),
            AuditOutcome::Completed {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        )
        .await;
    }

    /// Record a failed or timed-out call.
    pub async fn log_failure(&self, entry_id: &str, model: Option<&str>, outcome: AuditOutcome) {
        self.finish(entry_id, model, outcome).await;
    }

    async fn finish(&self, entry_id: &str, model: Option<&str>, outcome: AuditOutcome) {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.iter_mut().find(|e| e.entry_id == entry_id) {
            let now = Utc::now();
            entry.model = model.map(String::from);
            entry.outcome = Some(outcome);
            entry.responded_at = Some(now);
            entry.duration_ms = Some((now - entry.requested_at).num_milliseconds().max(0) as u64);
        }
    }

    /// Get recent entries.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Get entries for a purpose.
    pub async fn get_by_purpose(&self, purpose: Purpose, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.purpose == purpose)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Get statistics.
    pub async fn stats(&self) -> AuditStats {
        let entries = self.entries.read().await;

        let mut stats = AuditStats {
            total_requests: entries.len(),
            ..Default::default()
        };
        let mut timed = 0u64;
        let mut duration_sum = 0u64;

        for entry in entries.iter() {
            match &entry.outcome {
                Some(AuditOutcome::Completed {
                    prompt_tokens,
                    completion_tokens,
                }) => {
                    stats.completed += 1;
                    stats.total_tokens += (*prompt_tokens + *completion_tokens) as u64;
                }
                Some(AuditOutcome::Failed { .. }) => stats.failed += 1,
                Some(AuditOutcome::TimedOut) => stats.timed_out += 1,
                None => {}
            }
            if let Some(ms) = entry.duration_ms {
                timed += 1;
                duration_sum += ms;
            }
        }

        if timed > 0 {
            stats.avg_duration_ms = duration_sum / timed;
        }
        stats
    }

    /// Get count.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from the audit log.
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total_requests: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub total_tokens: u64,
    pub avg_duration_ms: u64,
}
