//! Async JSON-RPC client for the transfer watcher.
//!
//! Supports per-request timeouts, exponential backoff retry, and rate-limit
//! awareness (HTTP 429).

use std::time::Duration;

use serde_json::{Value, json};

use crate::error::RpcError;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Per-request timeout (default: 10s).
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors (default: 3).
    pub max_retries: u32,
    /// Base backoff, doubled on every retry (default: 1s).
    pub base_backoff: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

pub struct EthRpcClient {
    http: reqwest::Client,
    url: String,
    config: RpcConfig,
}

impl EthRpcClient {
    pub fn new(url: &str) -> Self {
        Self::with_config(url, RpcConfig::default())
    }

    pub fn with_config(url: &str, config: RpcConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.to_string(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity("eth_blockNumber", &result)
    }

    /// `eth_getLogs` over an inclusive block range.
    pub async fn get_logs(&self, from_block: u64, to_block: u64, topics: Value) -> Result<Vec<Value>, RpcError> {
        let filter = json!({
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
            "topics": topics,
        });
        match self.call("eth_getLogs", json!([filter])).await? {
            Value::Array(logs) => Ok(logs),
            other => Err(RpcError::parse(
                "eth_getLogs",
                "result",
                format!("expected array, got {other}"),
            )),
        }
    }

    /// Executes a call, retrying transient failures with backoff.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let backoff = self.config.base_backoff * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
            match self.call_once(method, &body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    tracing::debug!(method, attempt = attempt + 1, %err, "retrying JSON-RPC call");
                    attempt += 1;
                }
                Err(err) if attempt > 0 => {
                    return Err(RpcError::RetryExhausted {
                        method: method.into(),
                        attempts: attempt + 1,
                        last_error: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(&self, method: &str, body: &Value) -> Result<Value, RpcError> {
        let response = self.http.post(&self.url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout {
                    method: method.into(),
                    elapsed_ms: self.config.timeout.as_millis() as u64,
                }
            } else {
                RpcError::ConnectionFailed {
                    url: self.url.clone(),
                    cause: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::HttpError {
                method: method.into(),
                status: status.as_u16(),
                body,
            });
        }

        let json_response: Value = response
            .json()
            .await
            .map_err(|e| RpcError::parse(method, "response_body", e.to_string()))?;

        if let Some(error) = json_response.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(RpcError::JsonRpcError {
                method: method.into(),
                code,
                message,
            });
        }

        json_response
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::parse(method, "result", "missing result field"))
    }
}

pub(crate) fn parse_quantity(method: &str, value: &Value) -> Result<u64, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::parse(method, "quantity", "expected hex string"))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|e| RpcError::parse(method, "quantity", e.to_string()))
}
