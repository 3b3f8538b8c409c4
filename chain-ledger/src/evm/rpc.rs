//! json-rpc over http

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RpcConfig;
use crate::error::{LedgerError, Result};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// http json-rpc transport for one endpoint
pub struct RpcTransport {
    client: Client,
    url: String,
    config: RpcConfig,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(url: impl Into<String>, config: RpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// single attempt
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Unavailable(format!("HTTP {}: {}", status, body)));
        }

        let body: RpcResponse = response.json().await?;

        if let Some(error) = body.error {
            return Err(classify_rpc_error(error.code, error.message));
        }

        serde_json::from_value(body.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| LedgerError::DecodingError(format!("{}: {}", method, e)))
    }

    /// read call with exponential backoff on transient failures
    pub async fn call_with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let attempts = self.config.retry_attempts.max(1);
        let mut delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut attempt = 1;

        loop {
            match self.call(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::debug!(method, attempt, error = %e, "retrying rpc read");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn classify_rpc_error(code: i64, message: String) -> LedgerError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient funds") {
        LedgerError::InsufficientFunds(message)
    } else if lower.contains("nonce too low")
        || lower.contains("replacement transaction underpriced")
        || lower.contains("already known")
    {
        LedgerError::Rejected(message)
    } else {
        LedgerError::Rpc { code, message }
    }
}
