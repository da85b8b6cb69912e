//! Cache documents: the denormalized read model of one entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Args, ContentStatus, EntityId};

/// Current-state projection of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    pub id: EntityId,
    /// User who created the entity
    pub owner: String,
    pub status: ContentStatus,
    /// Time of the last event applied to this document
    pub timestamp: DateTime<Utc>,
    pub fields: Args,
    /// Entities this one references
    #[serde(default)]
    pub references: Vec<EntityId>,
    /// Entities referencing this one
    #[serde(default)]
    pub referencers: Vec<EntityId>,
    /// Path of the stored binary (media only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl CacheDocument {
    /// Case-insensitive match of `query` against every string field
    pub fn matches_text(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.fields.values().any(|value| match value {
            Value::String(s) => s.to_lowercase().contains(&needle),
            _ => false,
        })
    }
}

/// A user activity (score, rating, ...) recorded against an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub position: u64,
    pub subject: EntityId,
    pub user: String,
    pub activity: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// One page of query results plus the unpaged total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllItems<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> AllItems<T> {
    pub fn empty() -> Self {
        Self {
            total: 0,
            items: Vec::new(),
        }
    }
}
