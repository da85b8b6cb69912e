//! References index: who uses whom, and when things last changed
//!
//! Edges are directed: `A → B` means A depends on (uses) B. Both directions
//! are stored so "what does A use" and "who uses B" are single lookups.
//! Field-derived edges come from the registry's declared reference fields;
//! explicit `ReferenceAdded`/`ReferenceRemoved` events add and remove edges
//! directly.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{Event, EventKind, EntityId, ReferenceDiff, ResourceRegistry};

use super::DomainIndex;

#[derive(Debug, Default)]
struct ReferenceGraph {
    /// entity → entities it references
    outgoing: HashMap<EntityId, BTreeSet<EntityId>>,
    /// entity → entities referencing it
    incoming: HashMap<EntityId, BTreeSet<EntityId>>,
    /// entity → reference field → referenced entities
    field_refs: HashMap<EntityId, BTreeMap<String, BTreeSet<EntityId>>>,
    /// entity → time of its last event
    timestamps: HashMap<EntityId, DateTime<Utc>>,
}

impl ReferenceGraph {
    fn add_edge(&mut self, from: &EntityId, to: &EntityId, touched: &mut BTreeSet<EntityId>) {
        let inserted = self
            .outgoing
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.incoming
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        if inserted {
            touched.insert(from.clone());
            touched.insert(to.clone());
        }
    }

    fn remove_edge(&mut self, from: &EntityId, to: &EntityId, touched: &mut BTreeSet<EntityId>) {
        let removed = remove_from(&mut self.outgoing, from, to);
        remove_from(&mut self.incoming, to, from);
        if removed {
            touched.insert(from.clone());
            touched.insert(to.clone());
        }
    }

    fn clear_outgoing(&mut self, id: &EntityId, touched: &mut BTreeSet<EntityId>) {
        for target in self.outgoing.remove(id).unwrap_or_default() {
            remove_from(&mut self.incoming, &target, id);
            touched.insert(target);
            touched.insert(id.clone());
        }
    }

    fn clear_incoming(&mut self, id: &EntityId, touched: &mut BTreeSet<EntityId>) {
        for source in self.incoming.remove(id).unwrap_or_default() {
            remove_from(&mut self.outgoing, &source, id);
            touched.insert(source);
            touched.insert(id.clone());
        }
    }

    /// Replace the field-derived references of `id` and apply the edge diff
    fn set_field_refs(
        &mut self,
        id: &EntityId,
        fields: BTreeMap<String, BTreeSet<EntityId>>,
        touched: &mut BTreeSet<EntityId>,
    ) {
        let old = self.field_refs.insert(id.clone(), fields).unwrap_or_default();
        let old: BTreeSet<EntityId> = old.into_values().flatten().collect();
        let new: BTreeSet<EntityId> = self
            .field_refs
            .get(id)
            .map(|fields| fields.values().flatten().cloned().collect())
            .unwrap_or_default();

        let diff = ReferenceDiff::between(&old, &new);
        for target in &diff.removed {
            self.remove_edge(id, target, touched);
        }
        for target in &diff.added {
            self.add_edge(id, target, touched);
        }
    }

    fn last_modification_cascading(&self, id: &EntityId) -> Option<DateTime<Utc>> {
        let mut latest = *self.timestamps.get(id)?;
        let mut visited = HashSet::new();
        let mut stack = vec![id];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(ts) = self.timestamps.get(current) {
                latest = latest.max(*ts);
            }
            if let Some(targets) = self.outgoing.get(current) {
                stack.extend(targets.iter().filter(|t| !visited.contains(t)));
            }
        }

        Some(latest)
    }
}

fn remove_from(map: &mut HashMap<EntityId, BTreeSet<EntityId>>, key: &EntityId, value: &EntityId) -> bool {
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

/// Bidirectional reference graph with per-entity timestamps
#[derive(Debug)]
pub struct ReferencesIndex {
    registry: Arc<ResourceRegistry>,
    graph: Mutex<ReferenceGraph>,
}

impl ReferencesIndex {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            graph: Mutex::new(ReferenceGraph::default()),
        }
    }

    /// Add edges `from → to` for every target
    pub fn add_references(&self, from: &EntityId, to: &[EntityId]) {
        let mut graph = self.graph.lock();
        let mut touched = BTreeSet::new();
        for target in to {
            graph.add_edge(from, target, &mut touched);
        }
    }

    pub fn remove_reference(&self, from: &EntityId, to: &EntityId) {
        self.graph.lock().remove_edge(from, to, &mut BTreeSet::new());
    }

    /// Whether any entity other than `id` itself references it
    pub fn is_used(&self, id: &EntityId) -> bool {
        self.graph
            .lock()
            .incoming
            .get(id)
            .map_or(false, |sources| sources.iter().any(|source| source != id))
    }

    /// Latest timestamp of `id` and everything it transitively references
    ///
    /// `None` if no event about `id` was ever applied.
    pub fn last_modification_cascading(&self, id: &EntityId) -> Option<DateTime<Utc>> {
        self.graph.lock().last_modification_cascading(id)
    }

    /// Time of the last event about `id` itself
    pub fn last_modification(&self, id: &EntityId) -> Option<DateTime<Utc>> {
        self.graph.lock().timestamps.get(id).copied()
    }

    /// Drop every edge pointing at `id`
    pub fn clear_incoming_references(&self, id: &EntityId) {
        self.graph.lock().clear_incoming(id, &mut BTreeSet::new());
    }

    /// Drop every edge leaving `id`
    pub fn clear_outgoing_references(&self, id: &EntityId) {
        self.graph.lock().clear_outgoing(id, &mut BTreeSet::new());
    }

    /// Entities `id` references, in id order
    pub fn references_of(&self, id: &EntityId) -> Vec<EntityId> {
        self.graph
            .lock()
            .outgoing
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entities referencing `id`, in id order
    pub fn referencers_of(&self, id: &EntityId) -> Vec<EntityId> {
        self.graph
            .lock()
            .incoming
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget every edge and timestamp
    pub fn clear(&self) {
        *self.graph.lock() = ReferenceGraph::default();
    }

    /// Apply an event and return every entity whose edges changed
    pub fn apply(&self, event: &Event) -> BTreeSet<EntityId> {
        let subject = &event.subject;
        let shape = self.registry.get(&subject.resource_type);
        let mut touched = BTreeSet::new();
        let mut graph = self.graph.lock();

        match &event.kind {
            EventKind::Created { properties } | EventKind::Updated { properties } => {
                if let Some(shape) = shape {
                    graph.set_field_refs(subject, shape.field_references(properties), &mut touched);
                }
            }
            EventKind::PropertyChanged { property, value } => {
                if let Some(shape) = shape.filter(|s| {
                    s.field(property).map_or(false, |f| f.reference.is_some())
                }) {
                    let mut fields = graph.field_refs.get(subject).cloned().unwrap_or_default();
                    fields.insert(property.clone(), shape.references_in(property, value));
                    graph.set_field_refs(subject, fields, &mut touched);
                }
            }
            EventKind::Deleted => {
                graph.clear_outgoing(subject, &mut touched);
                graph.clear_incoming(subject, &mut touched);
                graph.field_refs.remove(subject);
            }
            EventKind::ReferenceAdded { target } => {
                graph.add_edge(subject, target, &mut touched);
            }
            EventKind::ReferenceRemoved { target } => {
                graph.remove_edge(subject, target, &mut touched);
            }
            EventKind::FileUpdated { .. } => {}
            // Activities do not change the entity
            EventKind::UserActivity { .. } => return touched,
        }

        graph.timestamps.insert(subject.clone(), event.timestamp);
        touched
    }
}

impl DomainIndex for ReferencesIndex {
    fn name(&self) -> &'static str {
        "references"
    }

    fn apply_event(&self, event: &Event) {
        self.apply(event);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
