//! Mock LLM backend for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// Mock backend for testing.
///
/// Configurable responses and behavior for unit tests. Scripted responses
/// are returned in order; once exhausted the default response is repeated.
pub struct MockBackend {
    model_id: String,
    available: AtomicBool,
    response_content: String,
    scripted: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
    call_count: AtomicU32,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            available: AtomicBool::new(true),
            response_content: "Mock response".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Set the response content.
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.response_content = content.into();
        self
    }

    /// Queue responses returned before the default one.
    pub fn with_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripted
            .get_mut()
            .extend(responses.into_iter().map(Into::into));
        self
    }

    /// Delay every completion.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Get the number of times complete was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("Mock backend disabled".to_string()));
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        // Estimate token counts
        let prompt_tokens: u32 = request
            .messages
            .iter()
            .map(|m| m.content.len() as u32 / 4)
            .sum();

        self.requests.lock().await.push(request);

        let content = self
            .scripted
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.response_content.clone());
        let completion_tokens = content.len() as u32 / 4;

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend() {
        let backend = MockBackend::new("test-model").with_response("Hello, world!");

        assert!(backend.is_available().await);
        assert_eq!(backend.call_count(), 0);

        let response = backend
            .complete(CompletionRequest::user("Hi"))
            .await
            .unwrap();

        assert_eq!(response.content, "Hello, world!");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_then_default() {
        let backend = MockBackend::default()
            .with_response("fallback")
            .with_responses(["first", "second"]);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let response = backend.complete(CompletionRequest::user("x")).await.unwrap();
            seen.push(response.content);
        }
        assert_eq!(seen, vec!["first", "second", "fallback"]);
        assert_eq!(backend.requests().await.len(), 3);
    }

    #[test]
    fn test_mock_unavailable() {
        let backend = MockBackend::new("test-model").with_available(false);

        assert!(!tokio_test::block_on(backend.is_available()));

        let result = tokio_test::block_on(backend.complete(CompletionRequest::user("Hi")));
        tokio_test::assert_err!(result);
        assert_eq!(backend.call_count(), 1);
    }
}
