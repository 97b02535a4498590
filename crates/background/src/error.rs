/// A host notification could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("notification could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    Status(u16),

    #[error("webhook gave up after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<NotifyError>,
    },
}

/// Structured JSON-RPC failures of the transfer watcher's node client.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("connection to {url} failed: {cause}")]
    ConnectionFailed { url: String, cause: String },

    #[error("{method} timed out after {elapsed_ms}ms")]
    Timeout { method: String, elapsed_ms: u64 },

    #[error("{method} HTTP {status}: {body}")]
    HttpError {
        method: String,
        status: u16,
        body: String,
    },

    #[error("{method} JSON-RPC error {code}: {message}")]
    JsonRpcError {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method} response parse error in {field}: {cause}")]
    ParseError {
        method: String,
        field: String,
        cause: String,
    },

    #[error("{method} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        method: String,
        attempts: u32,
        last_error: Box<RpcError>,
    },
}

impl RpcError {
    /// Connection failures, timeouts, rate limits and gateway errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::ConnectionFailed { .. } | RpcError::Timeout { .. } => true,
            RpcError::HttpError { status, .. } => matches!(*status, 429 | 502 | 503 | 504),
            RpcError::JsonRpcError { .. }
            | RpcError::ParseError { .. }
            | RpcError::RetryExhausted { .. } => false,
        }
    }

    pub(crate) fn parse(method: &str, field: &str, cause: impl Into<String>) -> Self {
        RpcError::ParseError {
            method: method.into(),
            field: field.into(),
            cause: cause.into(),
        }
    }
}
