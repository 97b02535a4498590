//! EIP-1193 request arguments and the closed set of wallet methods the guard
//! reacts to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument object of `provider.request({ method, params })`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestArguments {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }

    /// First positional parameter, if `params` is a non-empty array.
    pub fn first_param(&self) -> Option<&Value> {
        self.params.as_ref()?.as_array()?.first()
    }
}

/// Wallet methods with guard semantics. Everything else is `Other` and is
/// passed through without observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    RequestAccounts,
    SendTransaction,
    SendRawTransaction,
    SignTransaction,
    /// `eth_signTypedData`, `_v1`, `_v3`, `_v4`; the exact name is kept.
    SignTypedData(String),
    PersonalSign,
    ChainId,
    Other(String),
}

impl RpcMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "eth_requestAccounts" => Self::RequestAccounts,
            "eth_sendTransaction" => Self::SendTransaction,
            "eth_sendRawTransaction" => Self::SendRawTransaction,
            "eth_signTransaction" => Self::SignTransaction,
            "personal_sign" => Self::PersonalSign,
            "eth_chainId" => Self::ChainId,
            m if m.starts_with("eth_signTypedData") => Self::SignTypedData(m.to_string()),
            m => Self::Other(m.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RequestAccounts => "eth_requestAccounts",
            Self::SendTransaction => "eth_sendTransaction",
            Self::SendRawTransaction => "eth_sendRawTransaction",
            Self::SignTransaction => "eth_signTransaction",
            Self::PersonalSign => "personal_sign",
            Self::ChainId => "eth_chainId",
            Self::SignTypedData(name) | Self::Other(name) => name,
        }
    }
}

/// JSON-RPC body as sent over HTTP by dapps that bypass the injected provider.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcBody {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl From<JsonRpcBody> for RequestArguments {
    fn from(body: JsonRpcBody) -> Self {
        Self {
            method: body.method,
            params: body.params,
        }
    }
}
