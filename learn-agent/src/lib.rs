//! Learn Agent - model-backed judgment and content generation
//!
//! Provides the language-model collaborators of the Learn & Earn engine:
//! - Trait-based LLM backends (OpenAI-compatible, mock)
//! - Judgment of social proofs and free-text submissions
//! - Generation of tasks, quizzes, lessons and path summaries
//! - An audit trail of every model invocation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐
//! │  LlmJudge    │   │ LlmContentService    │
//! └──────┬───────┘   └──────────┬───────────┘
//!        └──────────┬───────────┘
//!                   ▼
//!        ┌─────────────────────┐
//!        │    AgentService     │
//!        │ (timeouts + audit)  │
//!        └──────────┬──────────┘
//!                   ▼
//!        ┌─────────────────────┐
//!        │     LlmBackend      │
//!        │  (OpenAI / Mock)    │
//!        └─────────────────────┘
//! ```

pub mod audit;
pub mod backend;
pub mod generation;
pub mod judge;
pub mod service;

pub use audit::{AuditEntry, AuditLog, AuditOutcome, Purpose};
pub use backend::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};
pub use backend::{MockBackend, OpenAiBackend, OpenAiConfig};
pub use generation::{
    ContentService, GeneratedQuiz, GeneratedTask, GenerationError, LlmContentService, PathEntry,
    QuizQuestion, TaskSpec,
};
pub use judge::{JudgeError, JudgmentService, LlmJudge, TaskContext};
pub use service::{AgentService, ServiceConfig, ServiceError};
