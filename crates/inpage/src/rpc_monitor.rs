//! Inspection of JSON-RPC bodies sent over HTTP by page code.
//!
//! Dapps that talk to a node directly bypass the injected provider, so their
//! outgoing `eth_sendTransaction` bodies are classified here instead.

use aegis_common::{RequestArguments, RpcMethod};
use aegis_common::rpc::JsonRpcBody;
use serde_json::Value;
use tracing::trace;

use crate::classifier::{Classification, classify_send};

const RPC_URL_HINTS: &[&str] = &["eth_", "rpc", "infura", "alchemy"];

/// Whether a fetch target looks like a JSON-RPC endpoint.
pub fn looks_like_rpc_endpoint(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    RPC_URL_HINTS.iter().any(|hint| url.contains(hint))
}

/// Classifies every `eth_sendTransaction` call in a single or batched body.
/// Bodies that are not JSON-RPC yield nothing.
pub fn extract_transactions(body: &str) -> Vec<Classification> {
    let calls: Vec<Value> = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(batch)) => batch,
        Ok(single @ Value::Object(_)) => vec![single],
        Ok(_) | Err(_) => {
            trace!("fetch body is not a JSON-RPC payload");
            return Vec::new();
        }
    };

    calls
        .into_iter()
        .filter_map(|call| serde_json::from_value::<JsonRpcBody>(call).ok())
        .map(RequestArguments::from)
        .filter(|args| RpcMethod::parse(&args.method) == RpcMethod::SendTransaction)
        .filter_map(|args| args.first_param()?.as_object().map(classify_send))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TxKind;
    use serde_json::json;

    #[test]
    fn endpoint_hints() {
        assert!(looks_like_rpc_endpoint("https://mainnet.infura.io/v3/key"));
        assert!(looks_like_rpc_endpoint("https://eth-mainnet.g.alchemy.com/v2/x"));
        assert!(looks_like_rpc_endpoint("http://localhost:8545/RPC"));
        assert!(!looks_like_rpc_endpoint("https://cdn.example/app.js"));
    }

    #[test]
    fn single_and_batched_bodies() {
        let send = json!({
            "jsonrpc": "2.0", "id": 1, "method": "eth_sendTransaction",
            "params": [{ "from": "0x01", "to": "0x02", "data": "0xa9059cbb" }]
        });
        let read = json!({ "jsonrpc": "2.0", "id": 2, "method": "eth_blockNumber", "params": [] });

        let single = extract_transactions(&send.to_string());
        assert_eq!(single.len(), 1);
        assert!(matches!(
            &single[0],
            Classification::Transaction(d) if d.kind == TxKind::ContractCall
        ));

        let batch = extract_transactions(&json!([read, send.clone(), send]).to_string());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(extract_transactions("not json").is_empty());
        assert!(extract_transactions("42").is_empty());
        assert!(
            extract_transactions(r#"{"method":"eth_sendTransaction","params":"0x"}"#).is_empty()
        );
    }
}
