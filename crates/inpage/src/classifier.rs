//! Transaction classifier.
//!
//! Maps a wallet request onto what it means for the user. Pure: no I/O, no
//! shared state, safe to call from any task.

use std::fmt;

use aegis_common::{AlertPayload, AlertPriority, RpcMethod};
use serde::Serialize;
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Known function selectors
// ---------------------------------------------------------------------------

/// transfer(address,uint256)
const SEL_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// approve(address,uint256)
const SEL_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

/// setApprovalForAll(address,bool)
const SEL_SET_APPROVAL_FOR_ALL: [u8; 4] = [0xa2, 0x2c, 0xb4, 0x65];

/// mint(address,uint256)
const SEL_MINT: [u8; 4] = [0x40, 0xc1, 0x0f, 0x19];

/// safeTransferFrom(address,address,uint256)
const SEL_SAFE_TRANSFER_FROM: [u8; 4] = [0x42, 0x84, 0x2e, 0x0e];

/// transferFrom(address,address,uint256)
const SEL_TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownSelector {
    pub selector: [u8; 4],
    pub label: &'static str,
    pub signature: &'static str,
}

pub const KNOWN_SELECTORS: [KnownSelector; 6] = [
    KnownSelector {
        selector: SEL_TRANSFER,
        label: "Token Transfer",
        signature: "transfer(address,uint256)",
    },
    KnownSelector {
        selector: SEL_APPROVE,
        label: "Token Approval",
        signature: "approve(address,uint256)",
    },
    KnownSelector {
        selector: SEL_SET_APPROVAL_FOR_ALL,
        label: "Set Approval For All",
        signature: "setApprovalForAll(address,bool)",
    },
    KnownSelector {
        selector: SEL_MINT,
        label: "Mint",
        signature: "mint(address,uint256)",
    },
    KnownSelector {
        selector: SEL_SAFE_TRANSFER_FROM,
        label: "Safe Transfer From",
        signature: "safeTransferFrom(address,address,uint256)",
    },
    KnownSelector {
        selector: SEL_TRANSFER_FROM,
        label: "Transfer From",
        signature: "transferFrom(address,address,uint256)",
    },
];

pub fn lookup_selector(selector: [u8; 4]) -> Option<&'static KnownSelector> {
    KNOWN_SELECTORS.iter().find(|known| known.selector == selector)
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxKind {
    ContractDeployment,
    EthTransfer,
    ContractCall,
}

impl TxKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::ContractDeployment => "Contract Deployment",
            Self::EthTransfer => "ETH Transfer",
            Self::ContractCall => "Contract Call",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Semantic view of one `eth_sendTransaction` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDescriptor {
    pub kind: TxKind,
    /// Lower-cased.
    pub from: Option<String>,
    /// Lower-cased.
    pub to: Option<String>,
    /// First ten characters of the call data (`0x` + selector).
    pub data_prefix: Option<String>,
    pub raw_value: Option<Value>,
    pub raw_gas: Option<Value>,
    pub selector: Option<[u8; 4]>,
    /// Call data length in bytes.
    pub data_len: usize,
}

impl TransactionDescriptor {
    pub fn known_selector(&self) -> Option<&'static KnownSelector> {
        self.selector.and_then(lookup_selector)
    }

    /// "Token Approval", "Contract Call", "ETH Transfer", ...
    pub fn label(&self) -> &'static str {
        match (self.kind, self.known_selector()) {
            (TxKind::ContractCall, Some(known)) => known.label,
            (kind, _) => kind.label(),
        }
    }

    /// Decoded method for contract calls, `None` otherwise.
    pub fn method_details(&self) -> Option<String> {
        if self.kind != TxKind::ContractCall {
            return None;
        }
        Some(match (self.known_selector(), &self.data_prefix) {
            (Some(known), _) => known.signature.to_string(),
            (None, Some(prefix)) => format!("Unknown method ({prefix})"),
            (None, None) => "Unknown method".to_string(),
        })
    }

    pub fn details(&self) -> Value {
        json!({
            "kind": self.kind,
            "label": self.label(),
            "from": self.from,
            "to": self.to,
            "dataPrefix": self.data_prefix,
            "method": self.method_details(),
            "value": self.raw_value,
            "gas": self.raw_gas,
            "dataLength": self.data_len,
        })
    }
}

// ---------------------------------------------------------------------------
// Signing prompts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningKind {
    RawTransaction,
    TransactionSigning,
    /// Message or typed-data signing; keeps the wallet method name.
    SignatureRequest(String),
}

impl SigningKind {
    pub fn alert(&self) -> AlertPayload {
        let (title, body) = match self {
            Self::RawTransaction => ("Raw Transaction", "Raw transaction being sent - review carefully"),
            Self::TransactionSigning => (
                "Transaction Signing",
                "Transaction is being signed - review details",
            ),
            Self::SignatureRequest(_) => ("Signature Request", "Review the message before signing"),
        };
        let method = match self {
            Self::RawTransaction => "eth_sendRawTransaction",
            Self::TransactionSigning => "eth_signTransaction",
            Self::SignatureRequest(method) => method.as_str(),
        };
        AlertPayload::new(title, body, AlertPriority::Medium).with_details(json!({ "method": method }))
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Transaction(TransactionDescriptor),
    /// A send with neither `to` nor `data`. No descriptor, but `from` is
    /// still checked against the watch-list.
    Undescribed { from: Option<String> },
    /// Track the first returned account once the wallet answers.
    AccountRequest,
    ReviewBeforeSigning(SigningKind),
    Passthrough,
}

/// Classifies one wallet request by method and first positional parameter.
pub fn classify(method: &RpcMethod, first_param: Option<&Value>) -> Classification {
    match method {
        RpcMethod::RequestAccounts => Classification::AccountRequest,
        RpcMethod::SendTransaction => match first_param.and_then(Value::as_object) {
            Some(tx) => classify_send(tx),
            None => Classification::Passthrough,
        },
        RpcMethod::SendRawTransaction => {
            Classification::ReviewBeforeSigning(SigningKind::RawTransaction)
        }
        RpcMethod::SignTransaction => {
            Classification::ReviewBeforeSigning(SigningKind::TransactionSigning)
        }
        RpcMethod::SignTypedData(name) => {
            Classification::ReviewBeforeSigning(SigningKind::SignatureRequest(name.clone()))
        }
        RpcMethod::PersonalSign => Classification::ReviewBeforeSigning(
            SigningKind::SignatureRequest(method.as_str().to_string()),
        ),
        RpcMethod::ChainId | RpcMethod::Other(_) => Classification::Passthrough,
    }
}

/// Classifies a transaction object, e.g. the first param of
/// `eth_sendTransaction` or a JSON-RPC body sent over HTTP.
pub fn classify_send(tx: &Map<String, Value>) -> Classification {
    let from = text_field(tx, "from").map(str::to_ascii_lowercase);
    let to = text_field(tx, "to").map(str::to_ascii_lowercase);
    let data = text_field(tx, "data");

    let kind = match (&to, data) {
        (None, Some(_)) => TxKind::ContractDeployment,
        (Some(_), None) => TxKind::EthTransfer,
        (Some(_), Some(_)) => TxKind::ContractCall,
        (None, None) => return Classification::Undescribed { from },
    };

    let data_prefix = data.map(|d| d.chars().take(10).collect::<String>().to_ascii_lowercase());
    let selector = match kind {
        TxKind::ContractCall => data.and_then(parse_selector),
        _ => None,
    };
    let data_len = data.map(hex_byte_len).unwrap_or(0);

    Classification::Transaction(TransactionDescriptor {
        kind,
        from,
        to,
        data_prefix,
        raw_value: opaque_field(tx, "value"),
        raw_gas: opaque_field(tx, "gas"),
        selector,
        data_len,
    })
}

/// Present means a non-empty string.
fn text_field<'a>(tx: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    tx.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn opaque_field(tx: &Map<String, Value>, key: &str) -> Option<Value> {
    tx.get(key).filter(|v| !v.is_null()).cloned()
}

fn parse_selector(data: &str) -> Option<[u8; 4]> {
    let digits = data.strip_prefix("0x").or_else(|| data.strip_prefix("0X"))?;
    let head = digits.get(..8)?;
    let mut selector = [0u8; 4];
    for (i, byte) in selector.iter_mut().enumerate() {
        *byte = u8::from_str_radix(head.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(selector)
}

fn hex_byte_len(data: &str) -> usize {
    let digits = data
        .strip_prefix("0x")
        .or_else(|| data.strip_prefix("0X"))
        .unwrap_or(data);
    digits.len() / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    const TO: &str = "0x00000000000000000000000000000000000000AA";
    const FROM: &str = "0x00000000000000000000000000000000000000BB";

    fn send(tx: Value) -> Classification {
        classify(&RpcMethod::SendTransaction, Some(&tx))
    }

    fn descriptor(tx: Value) -> TransactionDescriptor {
        match send(tx) {
            Classification::Transaction(d) => d,
            other => panic!("expected descriptor, got {other:?}"),
        }
    }

    #[test]
    fn kind_follows_presence_of_to_and_data() {
        assert_eq!(
            descriptor(json!({ "from": FROM, "data": "0x6080" })).kind,
            TxKind::ContractDeployment
        );
        assert_eq!(
            descriptor(json!({ "from": FROM, "to": TO, "value": "0x1" })).kind,
            TxKind::EthTransfer
        );
        assert_eq!(
            descriptor(json!({ "from": FROM, "to": TO, "data": "0xdeadbeef" })).kind,
            TxKind::ContractCall
        );
    }

    #[test]
    fn neither_to_nor_data_checks_from_only() {
        assert_eq!(
            send(json!({ "from": FROM, "value": "0x1" })),
            Classification::Undescribed {
                from: Some(FROM.to_ascii_lowercase())
            }
        );
    }

    #[test]
    fn null_empty_and_non_string_fields_are_absent() {
        for to in [Value::Null, json!(""), json!(42), json!({ "x": 1 })] {
            let d = descriptor(json!({ "from": FROM, "to": to, "data": "0x6080" }));
            assert_eq!(d.kind, TxKind::ContractDeployment, "to = {to}");
        }
        for data in [Value::Null, json!(""), json!(["0x"])] {
            let d = descriptor(json!({ "from": FROM, "to": TO, "data": data }));
            assert_eq!(d.kind, TxKind::EthTransfer, "data = {data}");
        }
    }

    #[test]
    fn known_selectors_map_to_labels() {
        let cases = [
            ("0xa9059cbb", "Token Transfer"),
            ("0x095ea7b3", "Token Approval"),
            ("0xa22cb465", "Set Approval For All"),
            ("0x40c10f19", "Mint"),
            ("0x42842e0e", "Safe Transfer From"),
            ("0x23b872dd", "Transfer From"),
        ];
        for (prefix, label) in cases {
            let d = descriptor(json!({ "to": TO, "data": format!("{prefix}{}", "00".repeat(64)) }));
            assert_eq!(d.label(), label);
            assert_eq!(d.data_prefix.as_deref(), Some(prefix));
            assert_eq!(d.data_len, 4 + 64);
        }
    }

    #[test]
    fn unknown_selector_keeps_raw_prefix() {
        let d = descriptor(json!({ "to": TO, "data": "0xDEADBEEF01" }));
        assert_eq!(d.label(), "Contract Call");
        assert_eq!(d.selector, Some([0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(d.method_details().as_deref(), Some("Unknown method (0xdeadbeef)"));
    }

    #[test]
    fn short_call_data_has_no_selector() {
        let d = descriptor(json!({ "to": TO, "data": "0x12" }));
        assert_eq!(d.kind, TxKind::ContractCall);
        assert_eq!(d.selector, None);
    }

    #[test]
    fn value_and_gas_pass_through_opaque() {
        let d = descriptor(json!({ "to": TO, "value": 17, "gas": "0x5208" }));
        assert_eq!(d.raw_value, Some(json!(17)));
        assert_eq!(d.raw_gas, Some(json!("0x5208")));
        assert_eq!(d.to.as_deref(), Some(TO.to_ascii_lowercase().as_str()));
    }

    #[test]
    fn every_method_class_is_covered() {
        assert_eq!(
            classify(&RpcMethod::RequestAccounts, None),
            Classification::AccountRequest
        );
        assert_eq!(
            classify(&RpcMethod::SendTransaction, None),
            Classification::Passthrough
        );
        assert_eq!(
            classify(&RpcMethod::SendRawTransaction, Some(&json!("0xf86c"))),
            Classification::ReviewBeforeSigning(SigningKind::RawTransaction)
        );
        assert_eq!(
            classify(&RpcMethod::SignTransaction, None),
            Classification::ReviewBeforeSigning(SigningKind::TransactionSigning)
        );
        assert_eq!(
            classify(&RpcMethod::parse("eth_signTypedData_v4"), None),
            Classification::ReviewBeforeSigning(SigningKind::SignatureRequest(
                "eth_signTypedData_v4".into()
            ))
        );
        assert_eq!(
            classify(&RpcMethod::PersonalSign, Some(&json!("0x68656c6c6f"))),
            Classification::ReviewBeforeSigning(SigningKind::SignatureRequest(
                "personal_sign".into()
            ))
        );
        assert_eq!(classify(&RpcMethod::ChainId, None), Classification::Passthrough);
        assert_eq!(
            classify(&RpcMethod::parse("eth_getBalance"), None),
            Classification::Passthrough
        );
    }

    #[test]
    fn signing_alert_texts() {
        let alert = SigningKind::RawTransaction.alert();
        assert_eq!(alert.title, "Raw Transaction");
        assert_eq!(alert.body, "Raw transaction being sent - review carefully");
        let alert = SigningKind::SignatureRequest("personal_sign".into()).alert();
        assert_eq!(alert.title, "Signature Request");
        assert_eq!(alert.priority, AlertPriority::Medium);
    }
}
