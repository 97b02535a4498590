//! Error types for the page context.

/// EIP-1193 provider error, returned to page code unchanged by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(4001, "User rejected the request.")
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(4200, format!("The provider does not support {method}."))
    }

    pub fn disconnected() -> Self {
        Self::new(4900, "The provider is disconnected.")
    }
}

/// Failure inside observation logic. Always contained at the interception
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    #[error("malformed {field} in {method} params")]
    MalformedParams { method: String, field: &'static str },

    #[error("page context is shutting down")]
    ShuttingDown,

    #[error("observer panicked during {stage}: {message}")]
    Panicked { stage: &'static str, message: String },
}

/// Failure of an outbound contract lookup. Never escapes the verification cache.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup service returned HTTP {0}")]
    Status(u16),

    #[error("lookup response could not be parsed: {0}")]
    Parse(String),
}

/// A packet could not be placed on one of the outbound channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("postMessage is unavailable in this frame")]
    PostMessageBlocked,

    #[error("document custom events are unavailable in this frame")]
    CustomEventBlocked,
}
