//! Wire protocol codec.
//!
//! Every frame is a JSON object `{ "type": string, "data"?: object, "payload"?: object }`.
//! Inbound frames are decoded into the closed [`InboundMessage`] union; unknown
//! `type` values are a [`ProtocolError`], never a silent fall-through.

use octofhir_core::{ResourceUpdateEvent, UpdateAction, resource_id_of, resource_type_of};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProtocolError;
use crate::registry::{SubscriptionFilter, SubscriptionId};

// ============================================================================
// Inbound
// ============================================================================

/// Inbound frame kinds understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Welcome,
    Ping,
    Pong,
    Error,
    Subscription,
    Update,
}

impl InboundKind {
    pub const ALL: [InboundKind; 6] = [
        InboundKind::Welcome,
        InboundKind::Ping,
        InboundKind::Pong,
        InboundKind::Error,
        InboundKind::Subscription,
        InboundKind::Update,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InboundKind::Welcome => "welcome",
            InboundKind::Ping => "ping",
            InboundKind::Pong => "pong",
            InboundKind::Error => "error",
            InboundKind::Subscription => "subscription",
            InboundKind::Update => "update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for InboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error code carried by an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorCode {
    AuthFailed,
    TokenExpired,
    Other(String),
}

impl ServerErrorCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "AUTH_FAILED" => ServerErrorCode::AuthFailed,
            "TOKEN_EXPIRED" => ServerErrorCode::TokenExpired,
            other => ServerErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServerErrorCode::AuthFailed => "AUTH_FAILED",
            ServerErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ServerErrorCode::Other(code) => code,
        }
    }
}

/// Decoded `error` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    pub code: ServerErrorCode,
    pub message: Option<String>,
}

impl ServerError {
    /// Auth-coded errors are routed to the auth coordinator.
    pub fn is_auth(&self) -> bool {
        matches!(
            self.code,
            ServerErrorCode::AuthFailed | ServerErrorCode::TokenExpired
        )
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Welcome { client_id: String },
    Ping,
    Pong,
    Error(ServerError),
    /// Subscription acknowledgement. Informational only.
    SubscriptionAck(Value),
    Update(ResourceUpdateEvent),
}

impl InboundMessage {
    pub fn kind(&self) -> InboundKind {
        match self {
            InboundMessage::Welcome { .. } => InboundKind::Welcome,
            InboundMessage::Ping => InboundKind::Ping,
            InboundMessage::Pong => InboundKind::Pong,
            InboundMessage::Error(_) => InboundKind::Error,
            InboundMessage::SubscriptionAck(_) => InboundKind::Subscription,
            InboundMessage::Update(_) => InboundKind::Update,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

impl RawFrame {
    fn body(self) -> Option<Value> {
        self.data.or(self.payload).filter(|v| !v.is_null())
    }
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(alias = "action")]
    event_type: Option<String>,
    resource_type: Option<String>,
    resource_id: Option<String>,
    patient_id: Option<String>,
    room: Option<String>,
    origin: Option<String>,
    resource: Option<Value>,
}

/// Decode a single text frame.
pub fn parse_frame(text: &str) -> Result<InboundMessage, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let kind = raw.kind.clone().ok_or(ProtocolError::MissingType)?;
    let kind = InboundKind::parse(&kind).ok_or(ProtocolError::UnknownType(kind))?;
    let body = raw.body();

    match kind {
        InboundKind::Welcome => {
            let client_id = body
                .as_ref()
                .and_then(|b| b.get("client_id"))
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::missing_field("welcome", "client_id"))?;
            Ok(InboundMessage::Welcome {
                client_id: client_id.to_string(),
            })
        }
        InboundKind::Ping => Ok(InboundMessage::Ping),
        InboundKind::Pong => Ok(InboundMessage::Pong),
        InboundKind::Error => {
            let body = body.ok_or_else(|| ProtocolError::missing_field("error", "data"))?;
            let code = body
                .get("error")
                .or_else(|| body.get("code"))
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::missing_field("error", "error"))?;
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(InboundMessage::Error(ServerError {
                code: ServerErrorCode::parse(code),
                message,
            }))
        }
        InboundKind::Subscription => Ok(InboundMessage::SubscriptionAck(
            body.unwrap_or(Value::Null),
        )),
        InboundKind::Update => {
            let body = body.ok_or_else(|| ProtocolError::missing_field("update", "data"))?;
            parse_update(body).map(InboundMessage::Update)
        }
    }
}

fn parse_update(body: Value) -> Result<ResourceUpdateEvent, ProtocolError> {
    let body: UpdateBody = serde_json::from_value(body)
        .map_err(|e| ProtocolError::invalid_payload("update", e.to_string()))?;

    let event_type = body
        .event_type
        .ok_or_else(|| ProtocolError::missing_field("update", "event_type"))?;
    let action = UpdateAction::parse(&event_type).ok_or_else(|| {
        ProtocolError::invalid_payload("update", format!("unknown event_type `{event_type}`"))
    })?;

    let resource = body.resource.filter(|v| !v.is_null());
    let resource_type = body
        .resource_type
        .or_else(|| resource.as_ref().and_then(resource_type_of).map(str::to_string))
        .ok_or_else(|| ProtocolError::missing_field("update", "resource_type"))?;
    let resource_id = body
        .resource_id
        .or_else(|| resource.as_ref().and_then(resource_id_of).map(str::to_string))
        .ok_or_else(|| ProtocolError::missing_field("update", "resource_id"))?;

    let mut event = ResourceUpdateEvent::new(action, resource_type, resource_id, resource);
    event.patient_id = body.patient_id;
    event.room = body.room;
    event.origin = body.origin;

    event
        .validate()
        .map_err(|e| ProtocolError::invalid_payload("update", e.to_string()))?;
    Ok(event)
}

// ============================================================================
// Outbound
// ============================================================================

/// An outbound control or application frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OutboundFrame {
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// `subscription` control frame for a registry entry.
    pub fn subscription(id: &SubscriptionId, filter: &SubscriptionFilter) -> Self {
        let data = match filter {
            SubscriptionFilter::Resources {
                patient_ids,
                resource_types,
            } => json!({
                "subscription_id": id.as_str(),
                "patient_ids": patient_ids,
                "resource_types": resource_types,
            }),
            SubscriptionFilter::Room { name } => json!({
                "subscription_id": id.as_str(),
                "room": name,
                "resource_types": [],
            }),
            SubscriptionFilter::All => json!({
                "subscription_id": id.as_str(),
                "patient_ids": [],
                "resource_types": [],
            }),
        };
        Self::new("subscription", Some(data))
    }

    pub fn unsubscribe(id: &SubscriptionId) -> Self {
        Self::new(
            "unsubscribe",
            Some(json!({ "subscription_id": id.as_str() })),
        )
    }

    pub fn ping() -> Self {
        Self::new("ping", None)
    }

    /// Application frame published by the owner.
    pub fn custom(event_type: impl Into<String>, data: Value) -> Self {
        let data = (!data.is_null()).then_some(data);
        Self::new(event_type, data)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
