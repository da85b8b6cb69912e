//! Document store: queryable holder of cache documents

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    ActivityRecord, AllItems, CacheDocument, ContentStatus, EntityId, ResourceRegistry,
    ResourceType,
};
use crate::utils::atomic_write_with;

/// Errors for malformed queries
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid sort key: {0}")]
    InvalidSortKey(String),
}

/// Filters, sort and paging for [`DocumentStore::query`]
///
/// Unset filters match everything. Without a status filter deleted
/// documents are hidden, as with `ContentStatus::All`.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub resource_type: Option<ResourceType>,
    pub status: Option<ContentStatus>,
    /// Restrict to these ids
    pub include_only: Option<BTreeSet<u64>>,
    pub exclude: BTreeSet<u64>,
    /// Case-insensitive substring over string fields
    pub text: Option<String>,
    /// Only documents referenced by one of these entities
    pub referenced_by: Option<(ResourceType, BTreeSet<u64>)>,
    pub modified_since: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    /// `id`, `timestamp` or a field name of the queried type
    pub sort_by: Option<String>,
    pub descending: bool,
    /// 1-based page number; requires `page_size`
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl DocumentQuery {
    /// Query over one resource type
    pub fn of(resource_type: ResourceType) -> Self {
        Self {
            resource_type: Some(resource_type),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ContentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn include_only(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.include_only = Some(ids.into_iter().collect());
        self
    }

    pub fn exclude(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.exclude = ids.into_iter().collect();
        self
    }

    pub fn text(mut self, query: impl Into<String>) -> Self {
        self.text = Some(query.into());
        self
    }

    pub fn referenced_by(mut self, resource_type: ResourceType, ids: impl IntoIterator<Item = u64>) -> Self {
        self.referenced_by = Some((resource_type, ids.into_iter().collect()));
        self
    }

    pub fn modified_since(mut self, timestamp: DateTime<Utc>) -> Self {
        self.modified_since = Some(timestamp);
        self
    }

    pub fn owned_by(mut self, user: impl Into<String>) -> Self {
        self.owner = Some(user.into());
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(key.into());
        self.descending = descending;
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(page.max(1));
        self.page_size = Some(page_size);
        self
    }

    fn matches(&self, doc: &CacheDocument) -> bool {
        if let Some(resource_type) = &self.resource_type {
            if &doc.id.resource_type != resource_type {
                return false;
            }
        }
        if !doc.status.matches(self.status.unwrap_or(ContentStatus::All)) {
            return false;
        }
        if let Some(ids) = &self.include_only {
            if !ids.contains(&doc.id.id) {
                return false;
            }
        }
        if self.exclude.contains(&doc.id.id) {
            return false;
        }
        if let Some(owner) = &self.owner {
            if &doc.owner != owner {
                return false;
            }
        }
        if let Some(since) = self.modified_since {
            if doc.timestamp < since {
                return false;
            }
        }
        if let Some((resource_type, ids)) = &self.referenced_by {
            let referenced = doc
                .referencers
                .iter()
                .any(|r| &r.resource_type == resource_type && ids.contains(&r.id));
            if !referenced {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !doc.matches_text(text) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<EntityId, CacheDocument>,
    activities: Vec<ActivityRecord>,
}

/// Current-state documents of every entity, plus recorded user activities
#[derive(Debug)]
pub struct DocumentStore {
    registry: Arc<ResourceRegistry>,
    state: RwLock<StoreState>,
}

impl DocumentStore {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<CacheDocument> {
        self.state.read().documents.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every document, deleted ones included, in id order
    pub fn documents(&self) -> Vec<CacheDocument> {
        self.state.read().documents.values().cloned().collect()
    }

    /// Run a query
    pub fn query(&self, query: &DocumentQuery) -> Result<AllItems<CacheDocument>, QueryError> {
        let sort_key = match query.sort_by.as_deref() {
            None | Some("id") => SortKey::Id,
            Some("timestamp") => SortKey::Timestamp,
            Some(field) if self.is_sortable_field(query.resource_type.as_ref(), field) => {
                SortKey::Field(field.to_string())
            }
            Some(other) => return Err(QueryError::InvalidSortKey(other.to_string())),
        };

        let mut items: Vec<CacheDocument> = self
            .state
            .read()
            .documents
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();

        items.sort_by(|a, b| {
            let ordering = sort_key.compare(a, b).then_with(|| a.id.cmp(&b.id));
            if query.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let total = items.len();
        if let Some(page_size) = query.page_size {
            let page = query.page.unwrap_or(1).max(1);
            items = items
                .into_iter()
                .skip((page - 1).saturating_mul(page_size))
                .take(page_size)
                .collect();
        }

        Ok(AllItems { total, items })
    }

    /// Activities recorded against `subject`, in log order
    pub fn activities_for(&self, subject: &EntityId) -> Vec<ActivityRecord> {
        self.state
            .read()
            .activities
            .iter()
            .filter(|a| &a.subject == subject)
            .cloned()
            .collect()
    }

    /// Write every document as one JSON line, atomically replacing `path`
    pub fn export_jsonl<P: AsRef<Path>>(&self, path: P) -> io::Result<usize> {
        let documents = self.documents();
        atomic_write_with(path.as_ref(), |file| {
            for doc in &documents {
                let line = serde_json::to_string(doc)?;
                writeln!(file, "{}", line)?;
            }
            Ok(())
        })?;

        tracing::info!(
            path = %path.as_ref().display(),
            documents = documents.len(),
            "Exported cache documents"
        );
        Ok(documents.len())
    }

    pub(crate) fn insert(&self, doc: CacheDocument) {
        self.state.write().documents.insert(doc.id.clone(), doc);
    }

    /// Mutate a document in place; returns false if it does not exist
    pub(crate) fn update<F>(&self, id: &EntityId, f: F) -> bool
    where
        F: FnOnce(&mut CacheDocument),
    {
        match self.state.write().documents.get_mut(id) {
            Some(doc) => {
                f(doc);
                true
            }
            None => false,
        }
    }

    pub(crate) fn push_activity(&self, record: ActivityRecord) {
        self.state.write().activities.push(record);
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.write();
        state.documents.clear();
        state.activities.clear();
    }

    fn is_sortable_field(&self, resource_type: Option<&ResourceType>, field: &str) -> bool {
        match resource_type {
            Some(t) => self
                .registry
                .get(t)
                .map_or(false, |shape| shape.field(field).is_some()),
            None => self
                .registry
                .types()
                .filter_map(|t| self.registry.get(t))
                .any(|shape| shape.field(field).is_some()),
        }
    }
}

enum SortKey {
    Id,
    Timestamp,
    Field(String),
}

impl SortKey {
    fn compare(&self, a: &CacheDocument, b: &CacheDocument) -> Ordering {
        match self {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortKey::Field(name) => compare_values(a.fields.get(name), b.fields.get(name)),
        }
    }
}

/// Total order over JSON values: missing/null, bools, numbers, strings, the rest
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Some(x), Some(y)) if rank(a) == 4 && rank(b) == 4 => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Args;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(resource_type: ResourceType, id: u64, fields: Value) -> CacheDocument {
        let fields: Args = fields.as_object().cloned().unwrap();
        CacheDocument {
            id: EntityId::new(resource_type, id),
            owner: "alice".to_string(),
            status: ContentStatus::from_args(&fields),
            timestamp: Utc::now(),
            fields,
            references: Vec::new(),
            referencers: Vec::new(),
            file: None,
        }
    }

    fn store() -> DocumentStore {
        let store = DocumentStore::new(Arc::new(ResourceRegistry::standard()));
        store.insert(doc(ResourceType::exhibit(), 0, json!({"name": "Dom", "status": "Published"})));
        store.insert(doc(ResourceType::exhibit(), 1, json!({"name": "Aula", "status": "Draft"})));
        store.insert(doc(ResourceType::exhibit(), 2, json!({"name": "Paderborner Dom", "status": "Deleted"})));
        store.insert(doc(ResourceType::tag(), 0, json!({"title": "Kirche", "status": "Published"})));
        store
    }

    #[test]
    fn test_query_hides_deleted_by_default() {
        let result = store().query(&DocumentQuery::of(ResourceType::exhibit())).unwrap();
        assert_eq!(result.total, 2);

        let deleted = store()
            .query(&DocumentQuery::of(ResourceType::exhibit()).with_status(ContentStatus::Deleted))
            .unwrap();
        assert_eq!(deleted.total, 1);
        assert_eq!(deleted.items[0].id.id, 2);
    }

    #[test]
    fn test_query_text_and_ids() {
        let store = store();
        let result = store.query(&DocumentQuery::default().text("dom")).unwrap();
        assert_eq!(result.total, 1);

        let result = store
            .query(&DocumentQuery::of(ResourceType::exhibit()).include_only([0, 1]).exclude([0]))
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id.id, 1);
    }

    #[test]
    fn test_sort_by_field_and_page() {
        let store = store();
        let query = DocumentQuery::of(ResourceType::exhibit())
            .sort_by("name", false)
            .page(1, 1);

        let result = store.query(&query).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].fields["name"], json!("Aula"));

        let result = store.query(&query.clone().page(2, 1)).unwrap();
        assert_eq!(result.items[0].fields["name"], json!("Dom"));
    }

    #[test]
    fn test_invalid_sort_key() {
        let result = store().query(&DocumentQuery::of(ResourceType::tag()).sort_by("latitude", false));
        assert_eq!(result, Err(QueryError::InvalidSortKey("latitude".to_string())));
    }

    #[test]
    fn test_modified_since_and_referenced_by() {
        let store = store();
        let future = Utc::now() + Duration::hours(1);
        assert_eq!(
            store.query(&DocumentQuery::default().modified_since(future)).unwrap().total,
            0
        );

        store.update(&EntityId::new(ResourceType::tag(), 0), |doc| {
            doc.referencers = vec![EntityId::new(ResourceType::exhibit(), 0)];
        });
        let result = store
            .query(&DocumentQuery::of(ResourceType::tag()).referenced_by(ResourceType::exhibit(), [0]))
            .unwrap();
        assert_eq!(result.total, 1);
    }

    #[test]
    fn test_export_jsonl() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.jsonl");

        let written = store().export_jsonl(&path).unwrap();

        assert_eq!(written, 4);
        let content = std::fs::read_to_string(&path).unwrap();
        let first: CacheDocument = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first.id, EntityId::new(ResourceType::exhibit(), 0));
    }
}
