//! Data types for the data store engine
//!
//! This module contains the core data structures shared by the log,
//! the indices, the cache projector and the migrations.

mod document;
mod entity;
mod event;
mod resource;

pub use document::{ActivityRecord, AllItems, CacheDocument};
pub use entity::{ContentStatus, EntityId, MediaType};
pub use event::{Event, EventKind, EventType, RecordedEvent};
pub use resource::{
    Cardinality, FieldSpec, ReferenceDiff, ReferenceSpec, ResourceRegistry, ResourceShape,
    ResourceShapeBuilder, ResourceType,
};

/// Argument snapshot of one entity: field name to value
pub type Args = serde_json::Map<String, serde_json::Value>;
