//! AgentService - entry point for model invocation.
//!
//! Selects an available backend, bounds every call with a timeout and
//! records it in the audit log.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::audit::{AuditLog, AuditOutcome, Purpose};
use crate::backend::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};

/// Error types for the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No backend available
    #[error("No LLM backend available")]
    NoBackendAvailable,

    /// Backend error
    #[error("Backend error: {0}")]
    BackendError(#[from] LlmError),

    /// The call did not finish in time
    #[error("Model call timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for the AgentService.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Timeout for judgment calls (ms)
    pub judgment_timeout_ms: u64,
    /// Timeout for generation calls (ms)
    pub generation_timeout_ms: u64,
    /// Whether to log all requests
    pub audit_enabled: bool,
    /// Maximum audit entries retained
    pub max_audit_entries: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            judgment_timeout_ms: 30_000,
            generation_timeout_ms: 60_000,
            audit_enabled: true,
            max_audit_entries: 10_000,
        }
    }
}

impl ServiceConfig {
    fn timeout_for(&self, purpose: Purpose) -> u64 {
        match purpose {
            Purpose::SocialProofJudgment | Purpose::SubmissionJudgment => self.judgment_timeout_ms,
            _ => self.generation_timeout_ms,
        }
    }
}

/// Shared front door to the language model backends.
pub struct AgentService {
    config: ServiceConfig,
    backends: Vec<Arc<dyn LlmBackend>>,
    audit: Arc<AuditLog>,
}

impl AgentService {
    /// Create a new service with the given backends, tried in order.
    pub fn new(backends: Vec<Arc<dyn LlmBackend>>) -> Self {
        let config = ServiceConfig::default();
        let audit = Arc::new(AuditLog::with_max_entries(config.max_audit_entries));
        Self {
            config,
            backends,
            audit,
        }
    }

    /// Create with configuration.
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.audit = Arc::new(AuditLog::with_max_entries(config.max_audit_entries));
        self.config = config;
        self
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one completion for `purpose`, bounded by the configured timeout.
    pub async fn invoke(
        &self,
        purpose: Purpose,
        subject: &str,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ServiceError> {
        let entry_id = if self.config.audit_enabled {
            Some(self.audit.log_request(purpose, subject).await)
        } else {
            None
        };

        let backend = match self.select_backend().await {
            Ok(backend) => backend,
            Err(e) => {
                if let Some(entry_id) = &entry_id {
                    self.audit
                        .log_failure(entry_id, None, AuditOutcome::Failed { error: e.to_string() })
                        .await;
                }
                return Err(e);
            }
        };

        debug!(?purpose, subject, model = backend.id(), "Invoking model");

        let timeout_ms = self.config.timeout_for(purpose);
        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), backend.complete(request))
                .await;

        let (outcome, error) = match result {
            Ok(Ok(response)) => {
                if let Some(entry_id) = &entry_id {
                    self.audit
                        .log_completion(entry_id, backend.id(), &response.usage)
                        .await;
                }
                return Ok(response);
            }
            Ok(Err(e)) => {
                let outcome = AuditOutcome::Failed { error: e.to_string() };
                (outcome, ServiceError::BackendError(e))
            }
            Err(_) => (AuditOutcome::TimedOut, ServiceError::Timeout(timeout_ms)),
        };

        if let Some(entry_id) = &entry_id {
            self.audit
                .log_failure(entry_id, Some(backend.id()), outcome)
                .await;
        }

        warn!(?purpose, subject, error = %error, "Model invocation failed");
        Err(error)
    }

    /// Select the first available backend.
    ///
    /// A lone backend is used without an availability check; if it is down
    /// the completion call fails on its own.
    async fn select_backend(&self) -> Result<Arc<dyn LlmBackend>, ServiceError> {
        if let [only] = self.backends.as_slice() {
            return Ok(Arc::clone(only));
        }
        for backend in &self.backends {
            if backend.is_available().await {
                return Ok(Arc::clone(backend));
            }
        }
        Err(ServiceError::NoBackendAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[tokio::test]
    async fn test_service_invoke() {
        let backend = Arc::new(MockBackend::default().with_response("YES"));
        let service = AgentService::new(vec![backend.clone()]);

        let response = service
            .invoke(
                Purpose::SocialProofJudgment,
                "Follow us",
                CompletionRequest::user("check"),
            )
            .await
            .unwrap();

        assert_eq!(response.content, "YES");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(service.audit().stats().await.completed, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_backend() {
        let down = Arc::new(MockBackend::new("down").with_available(false));
        let up = Arc::new(MockBackend::new("up").with_response("ok"));
        let service = AgentService::new(vec![down.clone(), up]);

        service
            .invoke(Purpose::PathSummary, "defi", CompletionRequest::user("x"))
            .await
            .unwrap();

        assert_eq!(down.call_count(), 0);
        assert_eq!(service.audit().recent(1).await[0].model.as_deref(), Some("up"));
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let first: Arc<dyn LlmBackend> = Arc::new(MockBackend::new("a").with_available(false));
        let second: Arc<dyn LlmBackend> = Arc::new(MockBackend::new("b").with_available(false));
        let service = AgentService::new(vec![first, second]);
        let result = service
            .invoke(Purpose::TaskGeneration, "defi", CompletionRequest::user("x"))
            .await;
        assert!(matches!(result, Err(ServiceError::NoBackendAvailable)));
    }

    #[tokio::test]
    async fn test_single_backend_is_called_directly() {
        let backend = Arc::new(MockBackend::default().with_available(false));
        let service = AgentService::new(vec![backend.clone()]);
        let result = service
            .invoke(Purpose::TaskGeneration, "defi", CompletionRequest::user("x"))
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::BackendError(LlmError::Unavailable(_)))
        ));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_single_remote_backend_skips_model_listing() {
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let backend: Arc<dyn LlmBackend> =
            Arc::new(crate::backend::OpenAiBackend::new(server.uri(), "gpt-4", None).unwrap());
        let service = AgentService::new(vec![backend]);
        for _ in 0..2 {
            let response = service
                .invoke(Purpose::PathSummary, "defi", CompletionRequest::user("x"))
                .await
                .unwrap();
            assert_eq!(response.content, "ok");
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let backend = Arc::new(MockBackend::default().with_delay(Duration::from_secs(5)));
        let service = AgentService::new(vec![backend]).with_config(ServiceConfig {
            judgment_timeout_ms: 50,
            ..Default::default()
        });

        let result = service
            .invoke(
                Purpose::SubmissionJudgment,
                "Write a contract",
                CompletionRequest::user("x"),
            )
            .await;

        assert!(matches!(result, Err(ServiceError::Timeout(50))));
        assert_eq!(service.audit().stats().await.timed_out, 1);
    }
}
