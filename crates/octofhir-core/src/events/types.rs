//! Event types for realtime resource synchronization.
//!
//! A `ResourceUpdateEvent` describes one change to a clinical resource as
//! pushed by the server (or recorded locally for an optimistic write).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{CoreError, Result};

// ============================================================================
// Update Action
// ============================================================================

/// Kind of change carried by an update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    /// Resource was created
    Created,
    /// Resource was updated
    Updated,
    /// Resource was deleted
    Deleted,
}

impl UpdateAction {
    /// Returns the string representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateAction::Created => "created",
            UpdateAction::Updated => "updated",
            UpdateAction::Deleted => "deleted",
        }
    }

    /// Parse the wire representation (`created`, `updated`, `deleted`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "created" | "create" => Some(UpdateAction::Created),
            "updated" | "update" => Some(UpdateAction::Updated),
            "deleted" | "delete" => Some(UpdateAction::Deleted),
            _ => None,
        }
    }

    /// Whether this action carries a full snapshot to upsert.
    pub fn is_upsert(&self) -> bool {
        !matches!(self, UpdateAction::Deleted)
    }
}

impl std::fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Resource Update Event
// ============================================================================

/// Event representing a change to a clinical resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUpdateEvent {
    /// Type of change (created, updated, deleted)
    pub action: UpdateAction,
    /// FHIR resource type (e.g., "Condition", "Observation")
    pub resource_type: String,
    /// Resource ID
    pub resource_id: String,
    /// Patient the resource belongs to, if any
    pub patient_id: Option<String>,
    /// Broadcast room the update was published to, if any
    pub room: Option<String>,
    /// Full resource snapshot (None for deletions)
    pub resource: Option<Value>,
    /// Client id of the session that authored the change, if the server tagged it
    pub origin: Option<String>,
    /// Local receive time. Never used for ordering.
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl ResourceUpdateEvent {
    /// Create a new update event.
    pub fn new(
        action: UpdateAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Option<Value>,
    ) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            patient_id: None,
            room: None,
            resource,
            origin: None,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    /// Create a "created" event.
    pub fn created(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self::new(UpdateAction::Created, resource_type, resource_id, Some(resource))
    }

    /// Create an "updated" event.
    pub fn updated(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self::new(UpdateAction::Updated, resource_type, resource_id, Some(resource))
    }

    /// Create a "deleted" event.
    pub fn deleted(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::new(UpdateAction::Deleted, resource_type, resource_id, None)
    }

    /// Set the patient id.
    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    /// Set the room.
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Set the origin client id.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Check the structural shape of the event.
    ///
    /// Upserts must carry an object snapshot; every event needs a resource
    /// type and a non-empty id. Ids and resource content are otherwise taken
    /// as the server sends them.
    pub fn validate(&self) -> Result<()> {
        if self.resource_type.is_empty() {
            return Err(CoreError::invalid_resource_type(""));
        }
        if self.resource_id.is_empty() {
            return Err(CoreError::invalid_id(""));
        }
        if self.action.is_upsert() {
            match &self.resource {
                Some(Value::Object(_)) => {}
                Some(_) => {
                    return Err(CoreError::invalid_resource(
                        "resource snapshot must be a JSON object",
                    ));
                }
                None => {
                    return Err(CoreError::invalid_event(format!(
                        "{} event for {}/{} has no resource snapshot",
                        self.action, self.resource_type, self.resource_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// `ResourceType/id` reference string.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }

    /// Whether the event was authored by the given client id.
    pub fn is_from(&self, client_id: &str) -> bool {
        self.origin.as_deref() == Some(client_id)
    }
}

/// Extract `id` from a resource snapshot.
pub fn resource_id_of(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str)
}

/// Extract `resourceType` from a resource snapshot.
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_event_created() {
        let event = ResourceUpdateEvent::created("Condition", "c1", json!({"id": "c1"}))
            .with_patient("p1");
        assert_eq!(event.action, UpdateAction::Created);
        assert_eq!(event.resource_type, "Condition");
        assert_eq!(event.resource_id, "c1");
        assert_eq!(event.patient_id.as_deref(), Some("p1"));
        assert_eq!(event.reference(), "Condition/c1");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_any_non_empty_id() {
        let event = ResourceUpdateEvent::deleted("Observation", "urn:uuid:7f1c/2024 draft");
        assert!(event.validate().is_ok());
        let long = ResourceUpdateEvent::deleted("Observation", "x".repeat(200));
        assert!(long.validate().is_ok());
        let empty = ResourceUpdateEvent::deleted("Observation", "");
        assert!(matches!(empty.validate(), Err(CoreError::InvalidId(_))));
    }

    #[test]
    fn test_validate_rejects_upsert_without_snapshot() {
        let mut event = ResourceUpdateEvent::updated("Condition", "c1", json!({}));
        event.resource = None;
        assert!(matches!(
            event.validate(),
            Err(CoreError::InvalidEvent { .. })
        ));

        event.resource = Some(json!("not an object"));
        assert!(matches!(
            event.validate(),
            Err(CoreError::InvalidResource { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_delete_without_snapshot() {
        let event = ResourceUpdateEvent::deleted("Condition", "c1");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(UpdateAction::parse("created"), Some(UpdateAction::Created));
        assert_eq!(UpdateAction::parse("UPDATE"), Some(UpdateAction::Updated));
        assert_eq!(UpdateAction::parse("deleted"), Some(UpdateAction::Deleted));
        assert_eq!(UpdateAction::parse("patched"), None);
        assert!(UpdateAction::Updated.is_upsert());
        assert!(!UpdateAction::Deleted.is_upsert());
    }

    #[test]
    fn test_origin() {
        let event = ResourceUpdateEvent::updated("Condition", "c1", json!({})).with_origin("me");
        assert!(event.is_from("me"));
        assert!(!event.is_from("someone-else"));
    }

    #[test]
    fn test_event_serialization() {
        let event = ResourceUpdateEvent::created("Condition", "c1", json!({"id": "c1"}));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ResourceUpdateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.resource_type, "Condition");
        assert_eq!(parsed.resource_id, "c1");
        assert_eq!(parsed.action, UpdateAction::Created);
    }

    #[test]
    fn test_snapshot_helpers() {
        let resource = json!({"resourceType": "Condition", "id": "c1"});
        assert_eq!(resource_id_of(&resource), Some("c1"));
        assert_eq!(resource_type_of(&resource), Some("Condition"));
        assert_eq!(resource_id_of(&json!({})), None);
    }
}
