//! LLM Backend abstraction layer.
//!
//! Provides a trait-based interface for different LLM inference backends:
//! - OpenAI-compatible (OpenAI, vLLM, Ollama, etc.)
//! - Mock backend for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockBackend;
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError, Usage};
