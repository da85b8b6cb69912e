//! Entity identity and status types

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ResourceType;

/// Identity of one entity: its resource type plus the per-type numeric id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub id: u64,
}

impl EntityId {
    /// Create a new entity reference
    pub fn new(resource_type: ResourceType, id: u64) -> Self {
        Self { resource_type, id }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl From<(ResourceType, u64)> for EntityId {
    fn from((resource_type, id): (ResourceType, u64)) -> Self {
        Self::new(resource_type, id)
    }
}

/// Publication status of a content entity
///
/// `All` never appears on an entity; it is the query value meaning
/// "every status except `Deleted`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentStatus {
    #[default]
    Draft,
    InReview,
    Published,
    Unpublished,
    Deleted,
    All,
}

impl ContentStatus {
    /// Whether an entity with status `self` is selected by the query status `filter`
    pub fn matches(self, filter: ContentStatus) -> bool {
        match filter {
            ContentStatus::All => self != ContentStatus::Deleted,
            other => self == other,
        }
    }

    /// Read the `status` field of an argument snapshot, falling back to `Draft`
    pub fn from_args(args: &super::Args) -> Self {
        args.get("status")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentStatus::Draft => "Draft",
            ContentStatus::InReview => "InReview",
            ContentStatus::Published => "Published",
            ContentStatus::Unpublished => "Unpublished",
            ContentStatus::Deleted => "Deleted",
            ContentStatus::All => "All",
        };
        f.write_str(s)
    }
}

/// Kind of binary a media entity holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Audio,
}

impl MediaType {
    /// Read the `type` field of a media argument snapshot
    pub fn from_args(args: &super::Args) -> Option<Self> {
        args.get("type")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
