//! Cross-context packet schema shared by the page, the relay and the
//! background.
//!
//! On the wire a packet is a JSON object:
//!
//! ```json
//! { "target": "AegisContent", "type": "Aegis/TransactionDetected",
//!   "payload": { "title": "...", "body": "..." }, "id": "<uuid>" }
//! ```
//!
//! `target` names the receiving context. Receivers decode with
//! [`AlertPacket::from_wire`], which returns `None` for anything outside the
//! closed set of targets and types so unknown traffic is dropped silently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Name of the same-document custom event used as the second delivery channel.
pub const DOM_EVENT_NAME: &str = "AegisInpageEvent";

/// Namespace for ids derived from packet content.
const CONTENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5f1c_2a4e_9b37_4d0a_8e61_a3c7_0b94_d2f8);

/// Id for a packet sent without one: both channel copies of it hash to the
/// same value, so receivers still see it once. Identical id-less packets are
/// indistinguishable and collapse too.
fn content_id(target: TargetTag, tagged: &Map<String, Value>) -> Uuid {
    let mut name = match target {
        TargetTag::Page => b"page:".to_vec(),
        TargetTag::Relay => b"relay:".to_vec(),
    };
    name.extend_from_slice(Value::Object(tagged.clone()).to_string().as_bytes());
    Uuid::new_v5(&CONTENT_ID_NAMESPACE, &name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetTag {
    /// The page context (injected script).
    #[serde(rename = "AegisInpage")]
    Page,
    /// The content relay.
    #[serde(rename = "AegisContent")]
    Relay,
}

/// Alert priority, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    /// Heuristic signals that could not be tied to an intercepted call.
    Low,
    /// Review-before-signing prompts and unverified contracts.
    Medium,
    /// Watch-list hits and high-risk contracts.
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
    pub priority: AlertPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AlertPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>, priority: AlertPriority) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Closed set of packet types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PacketBody {
    #[serde(rename = "Aegis/TransactionDetected")]
    TransactionDetected(AlertPayload),
    #[serde(rename = "Aegis/TrackAddress")]
    TrackAddressRequest { address: String },
    #[serde(rename = "Aegis/GetAddresses")]
    AddressListQuery,
    #[serde(rename = "Aegis/AddressesResponse")]
    AddressListResponse { addresses: Vec<String> },
    #[serde(rename = "Aegis/AddAddress")]
    AddressAdd { address: String },
    #[serde(rename = "Aegis/RemoveAddress")]
    AddressRemove { address: String },
    #[serde(rename = "Aegis/ToggleUi")]
    ToggleUi,
}

impl PacketBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TransactionDetected(_) => "Aegis/TransactionDetected",
            Self::TrackAddressRequest { .. } => "Aegis/TrackAddress",
            Self::AddressListQuery => "Aegis/GetAddresses",
            Self::AddressListResponse { .. } => "Aegis/AddressesResponse",
            Self::AddressAdd { .. } => "Aegis/AddAddress",
            Self::AddressRemove { .. } => "Aegis/RemoveAddress",
            Self::ToggleUi => "Aegis/ToggleUi",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertPacket {
    /// Shared by every channel copy of the same packet.
    pub id: Uuid,
    pub target: TargetTag,
    pub body: PacketBody,
}

impl AlertPacket {
    pub fn new(target: TargetTag, body: PacketBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            body,
        }
    }

    pub fn to_wire(&self) -> Value {
        let mut object = match serde_json::to_value(&self.body) {
            Ok(Value::Object(map)) => map,
            // Adjacently tagged enums always serialize to an object.
            _ => Map::new(),
        };
        object.insert(
            "target".to_string(),
            serde_json::to_value(self.target).unwrap_or(Value::Null),
        );
        object.insert("id".to_string(), Value::String(self.id.to_string()));
        Value::Object(object)
    }

    /// Decodes a wire packet. Unknown targets, unknown types, malformed
    /// payloads and non-objects all yield `None`.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let target: TargetTag = serde_json::from_value(object.get("target")?.clone()).ok()?;

        let mut tagged = Map::new();
        tagged.insert("type".to_string(), object.get("type")?.clone());
        if let Some(payload) = object.get("payload").filter(|p| !p.is_null()) {
            tagged.insert("payload".to_string(), payload.clone());
        }
        let body: PacketBody = serde_json::from_value(Value::Object(tagged.clone())).ok()?;

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(|| content_id(target, &tagged));

        Some(Self { id, target, body })
    }
}
