//! Event types for Event Sourcing
//!
//! This module defines the events stored in the append-only log.
//! Events are immutable records of state changes that are replayed to
//! rebuild every index and the cache read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Args, EntityId};

/// Discriminant of an [`EventKind`], used for statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    PropertyChanged,
    Deleted,
    ReferenceAdded,
    ReferenceRemoved,
    FileUpdated,
    UserActivity,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Created => write!(f, "created"),
            EventType::Updated => write!(f, "updated"),
            EventType::PropertyChanged => write!(f, "property_changed"),
            EventType::Deleted => write!(f, "deleted"),
            EventType::ReferenceAdded => write!(f, "reference_added"),
            EventType::ReferenceRemoved => write!(f, "reference_removed"),
            EventType::FileUpdated => write!(f, "file_updated"),
            EventType::UserActivity => write!(f, "user_activity"),
        }
    }
}

/// What happened to the subject entity
///
/// Closed set: adding a kind means extending every index's `apply_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Entity created with its initial argument snapshot
    Created { properties: Args },
    /// Whole argument snapshot replaced
    Updated { properties: Args },
    /// Single argument field changed
    PropertyChanged { property: String, value: Value },
    /// Entity tombstoned
    Deleted,
    /// Subject now depends on `target`
    ReferenceAdded { target: EntityId },
    /// Subject no longer depends on `target`
    ReferenceRemoved { target: EntityId },
    /// Stored binary of a media entity replaced
    FileUpdated { file: String },
    /// User-attributed fact that changes no entity state (scores, ratings)
    UserActivity {
        activity: String,
        #[serde(default)]
        data: Value,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Created { .. } => EventType::Created,
            EventKind::Updated { .. } => EventType::Updated,
            EventKind::PropertyChanged { .. } => EventType::PropertyChanged,
            EventKind::Deleted => EventType::Deleted,
            EventKind::ReferenceAdded { .. } => EventType::ReferenceAdded,
            EventKind::ReferenceRemoved { .. } => EventType::ReferenceRemoved,
            EventKind::FileUpdated { .. } => EventType::FileUpdated,
            EventKind::UserActivity { .. } => EventType::UserActivity,
        }
    }
}

/// An immutable event, as admitted by the append path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Entity the event is about
    pub subject: EntityId,

    #[serde(rename = "event")]
    pub kind: EventKind,

    /// User who triggered the event
    pub user: String,

    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(subject: EntityId, kind: EventKind, user: impl Into<String>) -> Self {
        Self {
            subject,
            kind,
            user: user.into(),
            timestamp: crate::utils::now(),
        }
    }

    pub fn created(subject: EntityId, user: impl Into<String>, properties: Args) -> Self {
        Self::new(subject, EventKind::Created { properties }, user)
    }

    pub fn updated(subject: EntityId, user: impl Into<String>, properties: Args) -> Self {
        Self::new(subject, EventKind::Updated { properties }, user)
    }

    pub fn property_changed(
        subject: EntityId,
        user: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> Self {
        let kind = EventKind::PropertyChanged {
            property: property.into(),
            value,
        };
        Self::new(subject, kind, user)
    }

    pub fn deleted(subject: EntityId, user: impl Into<String>) -> Self {
        Self::new(subject, EventKind::Deleted, user)
    }

    pub fn reference_added(from: EntityId, to: EntityId, user: impl Into<String>) -> Self {
        Self::new(from, EventKind::ReferenceAdded { target: to }, user)
    }

    pub fn reference_removed(from: EntityId, to: EntityId, user: impl Into<String>) -> Self {
        Self::new(from, EventKind::ReferenceRemoved { target: to }, user)
    }

    pub fn file_updated(subject: EntityId, user: impl Into<String>, file: impl Into<String>) -> Self {
        Self::new(subject, EventKind::FileUpdated { file: file.into() }, user)
    }

    pub fn user_activity(
        subject: EntityId,
        user: impl Into<String>,
        activity: impl Into<String>,
        data: Value,
    ) -> Self {
        let kind = EventKind::UserActivity {
            activity: activity.into(),
            data,
        };
        Self::new(subject, kind, user)
    }

    /// Override the timestamp (replays of historical data, migrations, tests)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

/// An event committed to the log at a global position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Zero-based position in the log
    pub position: u64,

    #[serde(flatten)]
    pub event: Event,
}

impl RecordedEvent {
    pub fn new(position: u64, event: Event) -> Self {
        Self { position, event }
    }

    /// Serialize event to JSON string (for JSONL)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceType;
    use chrono::TimeZone;
    use serde_json::json;

    fn exhibit(id: u64) -> EntityId {
        EntityId::new(ResourceType::exhibit(), id)
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::PropertyChanged).unwrap();
        assert_eq!(json, "\"property_changed\"");

        let parsed: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EventType::PropertyChanged);
    }

    #[test]
    fn test_recorded_event_json_line() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let properties = json!({"name": "Dom", "status": "Draft"})
            .as_object()
            .cloned()
            .unwrap();
        let event = Event::created(exhibit(3), "alice", properties).with_timestamp(ts);
        let recorded = RecordedEvent::new(12, event);

        let line = recorded.to_json_line().unwrap();
        assert!(line.contains("\"position\":12"));
        assert!(line.contains("\"subject\":{\"type\":\"Exhibit\",\"id\":3}"));
        assert!(line.contains("\"type\":\"created\""));
        assert!(line.contains("\"user\":\"alice\""));
        assert!(line.contains("\"ts\":\"2024-01-01T00:00:00Z\""));

        let parsed = RecordedEvent::from_json_line(&line).unwrap();
        assert_eq!(parsed, recorded);
    }

    #[test]
    fn test_deleted_event_has_no_payload() {
        let event = Event::deleted(exhibit(1), "bob");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], json!({"type": "deleted"}));
        assert_eq!(event.event_type(), EventType::Deleted);
    }

    #[test]
    fn test_reference_event_target() {
        let page = EntityId::new(ResourceType::exhibit_page(), 4);
        let event = Event::reference_added(exhibit(1), page.clone(), "bob");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"]["target"], json!({"type": "ExhibitPage", "id": 4}));

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind, EventKind::ReferenceAdded { target: page });
    }

    #[test]
    fn test_user_activity_data_defaults_to_null() {
        let json = json!({
            "subject": {"type": "Exhibit", "id": 1},
            "event": {"type": "user_activity", "activity": "rating"},
            "user": "carol",
            "ts": "2024-03-01T12:00:00Z"
        });
        let event: Event = serde_json::from_value(json).unwrap();
        assert_eq!(
            event.kind,
            EventKind::UserActivity {
                activity: "rating".to_string(),
                data: Value::Null
            }
        );
    }
}
