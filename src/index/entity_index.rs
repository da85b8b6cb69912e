//! Entity index: id allocation, status and ownership

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::types::{ContentStatus, Event, EventKind, ResourceType};

use super::DomainIndex;

/// What the index knows about one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFacts {
    pub id: u64,
    pub status: ContentStatus,
    /// User who created the entity
    pub owner: String,
}

#[derive(Debug, Default)]
struct TypeInfo {
    /// Highest id handed out or seen in the log
    maximum_id: Option<u64>,
    entities: BTreeMap<u64, EntityFacts>,
}

impl TypeInfo {
    fn observe_id(&mut self, id: u64) {
        self.maximum_id = Some(self.maximum_id.map_or(id, |max| max.max(id)));
    }
}

/// Per resource type: id counter plus status/owner of every entity
#[derive(Debug, Default)]
pub struct EntityIndex {
    types: Mutex<HashMap<ResourceType, TypeInfo>>,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id for `resource_type`
    ///
    /// Ids start at 0 and are never handed out twice, even if the Create
    /// event for a reserved id is never appended.
    pub fn next_id(&self, resource_type: &ResourceType) -> u64 {
        let mut types = self.types.lock();
        let info = types.entry(resource_type.clone()).or_default();
        let id = info.maximum_id.map_or(0, |max| max + 1);
        info.maximum_id = Some(id);
        id
    }

    /// Highest id reserved or replayed for `resource_type`, without reserving
    pub fn maximum_id(&self, resource_type: &ResourceType) -> Option<u64> {
        self.types
            .lock()
            .get(resource_type)
            .and_then(|info| info.maximum_id)
    }

    pub fn status(&self, resource_type: &ResourceType, id: u64) -> Option<ContentStatus> {
        self.facts(resource_type, id).map(|facts| facts.status)
    }

    pub fn owner(&self, resource_type: &ResourceType, id: u64) -> Option<String> {
        self.facts(resource_type, id).map(|facts| facts.owner)
    }

    /// Whether the entity was created and not deleted
    pub fn exists(&self, resource_type: &ResourceType, id: u64) -> bool {
        self.status(resource_type, id)
            .map_or(false, |status| status != ContentStatus::Deleted)
    }

    /// Ids of `resource_type` with `status` that pass `visible`, ascending
    ///
    /// `ContentStatus::All` selects every entity that is not deleted. The
    /// visibility predicate is resolved by the caller (permissions live
    /// outside the engine). It runs after the lock is released, so it may
    /// query this index again.
    pub fn all_ids<F>(&self, resource_type: &ResourceType, status: ContentStatus, visible: F) -> Vec<u64>
    where
        F: Fn(&EntityFacts) -> bool,
    {
        let candidates: Vec<EntityFacts> = match self.types.lock().get(resource_type) {
            Some(info) => info
                .entities
                .values()
                .filter(|facts| facts.status.matches(status))
                .cloned()
                .collect(),
            None => return Vec::new(),
        };

        candidates
            .into_iter()
            .filter(|facts| visible(facts))
            .map(|facts| facts.id)
            .collect()
    }

    fn facts(&self, resource_type: &ResourceType, id: u64) -> Option<EntityFacts> {
        self.types
            .lock()
            .get(resource_type)
            .and_then(|info| info.entities.get(&id))
            .cloned()
    }
}

impl DomainIndex for EntityIndex {
    fn name(&self) -> &'static str {
        "entities"
    }

    fn apply_event(&self, event: &Event) {
        let subject = &event.subject;
        let mut types = self.types.lock();
        let info = types.entry(subject.resource_type.clone()).or_default();

        match &event.kind {
            EventKind::Created { properties } => {
                info.observe_id(subject.id);
                info.entities.insert(
                    subject.id,
                    EntityFacts {
                        id: subject.id,
                        status: ContentStatus::from_args(properties),
                        owner: event.user.clone(),
                    },
                );
            }
            EventKind::Updated { properties } => {
                if let Some(facts) = info.entities.get_mut(&subject.id) {
                    facts.status = ContentStatus::from_args(properties);
                }
            }
            EventKind::PropertyChanged { property, value } if property == "status" => {
                let status = serde_json::from_value::<ContentStatus>(value.clone());
                match (info.entities.get_mut(&subject.id), status) {
                    (Some(facts), Ok(status)) => facts.status = status,
                    (Some(_), Err(e)) => {
                        tracing::warn!(subject = %subject, error = %e, "Ignoring invalid status value");
                    }
                    (None, _) => {}
                }
            }
            EventKind::Deleted => {
                if let Some(facts) = info.entities.get_mut(&subject.id) {
                    facts.status = ContentStatus::Deleted;
                }
            }
            EventKind::PropertyChanged { .. }
            | EventKind::ReferenceAdded { .. }
            | EventKind::ReferenceRemoved { .. }
            | EventKind::FileUpdated { .. }
            | EventKind::UserActivity { .. } => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Args, EntityId};
    use serde_json::json;

    fn exhibit(id: u64) -> EntityId {
        EntityId::new(ResourceType::exhibit(), id)
    }

    fn args(value: serde_json::Value) -> Args {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_first_id_is_zero() {
        let index = EntityIndex::new();
        assert_eq!(index.next_id(&ResourceType::exhibit()), 0);
        assert_eq!(index.next_id(&ResourceType::exhibit()), 1);
        assert_eq!(index.next_id(&ResourceType::route()), 0);
    }

    #[test]
    fn test_next_id_seeded_from_replay() {
        let index = EntityIndex::new();
        index.apply_event(&Event::created(exhibit(41), "alice", Args::new()));
        index.apply_event(&Event::created(exhibit(7), "alice", Args::new()));

        assert_eq!(index.maximum_id(&ResourceType::exhibit()), Some(41));
        assert_eq!(index.next_id(&ResourceType::exhibit()), 42);
        assert_eq!(index.maximum_id(&ResourceType::exhibit()), Some(42));
        assert_eq!(index.maximum_id(&ResourceType::route()), None);
    }

    #[test]
    fn test_created_sets_owner_and_status() {
        let index = EntityIndex::new();
        index.apply_event(&Event::created(
            exhibit(0),
            "alice",
            args(json!({"status": "Published"})),
        ));

        assert_eq!(
            index.status(&ResourceType::exhibit(), 0),
            Some(ContentStatus::Published)
        );
        assert_eq!(index.owner(&ResourceType::exhibit(), 0).as_deref(), Some("alice"));
        assert!(index.exists(&ResourceType::exhibit(), 0));
    }

    #[test]
    fn test_status_changes() {
        let index = EntityIndex::new();
        index.apply_event(&Event::created(exhibit(0), "alice", Args::new()));
        index.apply_event(&Event::property_changed(
            exhibit(0),
            "bob",
            "status",
            json!("InReview"),
        ));
        assert_eq!(
            index.status(&ResourceType::exhibit(), 0),
            Some(ContentStatus::InReview)
        );

        index.apply_event(&Event::updated(
            exhibit(0),
            "bob",
            args(json!({"status": "Unpublished"})),
        ));
        assert_eq!(
            index.status(&ResourceType::exhibit(), 0),
            Some(ContentStatus::Unpublished)
        );
        // Owner stays with the creator
        assert_eq!(index.owner(&ResourceType::exhibit(), 0).as_deref(), Some("alice"));
    }

    #[test]
    fn test_deleted_is_tombstoned() {
        let index = EntityIndex::new();
        index.apply_event(&Event::created(exhibit(0), "alice", Args::new()));
        index.apply_event(&Event::deleted(exhibit(0), "alice"));

        assert!(!index.exists(&ResourceType::exhibit(), 0));
        assert_eq!(
            index.status(&ResourceType::exhibit(), 0),
            Some(ContentStatus::Deleted)
        );
        assert!(index
            .all_ids(&ResourceType::exhibit(), ContentStatus::All, |_| true)
            .is_empty());
        // The id is not handed out again
        assert_eq!(index.next_id(&ResourceType::exhibit()), 1);
    }

    #[test]
    fn test_all_ids_filters() {
        let index = EntityIndex::new();
        index.apply_event(&Event::created(exhibit(0), "alice", args(json!({"status": "Published"}))));
        index.apply_event(&Event::created(exhibit(1), "bob", Args::new()));
        index.apply_event(&Event::created(exhibit(2), "bob", args(json!({"status": "Published"}))));

        let exhibits = ResourceType::exhibit();
        assert_eq!(index.all_ids(&exhibits, ContentStatus::All, |_| true), vec![0, 1, 2]);
        assert_eq!(
            index.all_ids(&exhibits, ContentStatus::Published, |_| true),
            vec![0, 2]
        );
        assert_eq!(
            index.all_ids(&exhibits, ContentStatus::All, |facts| facts.owner == "bob"),
            vec![1, 2]
        );
        assert!(index
            .all_ids(&ResourceType::tag(), ContentStatus::All, |_| true)
            .is_empty());
    }

    #[test]
    fn test_all_ids_predicate_may_query_index() {
        let index = EntityIndex::new();
        for id in 0..3 {
            index.apply_event(&Event::created(exhibit(id), "alice", Args::new()));
        }
        index.apply_event(&Event::created(
            EntityId::new(ResourceType::route(), 1),
            "bob",
            Args::new(),
        ));

        let ids = index.all_ids(&ResourceType::exhibit(), ContentStatus::All, |facts| {
            index.exists(&ResourceType::route(), facts.id)
                && index.owner(&ResourceType::exhibit(), facts.id).as_deref() == Some("alice")
        });
        assert_eq!(ids, vec![1]);
    }
}
