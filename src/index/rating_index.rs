//! Rating index: per-entity rating statistics folded from user activity
//!
//! A rating is a `UserActivity` event with activity [`RATING_ACTIVITY`] and
//! data `{"value": <integer>, "id": <rating id>}`. Each user holds at most one
//! rating per entity; a later rating replaces the earlier one.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::Value;

use crate::types::{EntityId, Event, EventKind, ResourceType};

use super::DomainIndex;

/// Activity name of rating events
pub const RATING_ACTIVITY: &str = "rating";

#[derive(Debug, Default)]
struct RatingState {
    /// Latest value per user for every rated entity
    ratings: HashMap<EntityId, BTreeMap<String, i64>>,
    /// Highest rating id handed out or seen, per rated resource type
    maximum_id: HashMap<ResourceType, u64>,
}

#[derive(Debug, Default)]
pub struct RatingIndex {
    state: Mutex<RatingState>,
}

impl RatingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the data payload of a rating event
    pub fn rating_data(id: u64, value: i64) -> Value {
        serde_json::json!({ "id": id, "value": value })
    }

    /// Reserve the next rating id for ratings of `resource_type`
    pub fn next_id(&self, resource_type: &ResourceType) -> u64 {
        let mut state = self.state.lock();
        let id = state
            .maximum_id
            .get(resource_type)
            .map_or(0, |max| max + 1);
        state.maximum_id.insert(resource_type.clone(), id);
        id
    }

    /// Number of users who rated `entity`
    pub fn count(&self, entity: &EntityId) -> usize {
        self.state
            .lock()
            .ratings
            .get(entity)
            .map_or(0, BTreeMap::len)
    }

    /// Mean of the current ratings, `None` when unrated
    pub fn average(&self, entity: &EntityId) -> Option<f64> {
        let state = self.state.lock();
        let values = state.ratings.get(entity).filter(|r| !r.is_empty())?;
        let sum: i64 = values.values().sum();
        Some(sum as f64 / values.len() as f64)
    }

    /// How many users gave each rating value
    pub fn table(&self, entity: &EntityId) -> BTreeMap<i64, usize> {
        let mut table = BTreeMap::new();
        if let Some(values) = self.state.lock().ratings.get(entity) {
            for value in values.values() {
                *table.entry(*value).or_insert(0) += 1;
            }
        }
        table
    }

    pub fn user_rating(&self, entity: &EntityId, user: &str) -> Option<i64> {
        self.state
            .lock()
            .ratings
            .get(entity)
            .and_then(|values| values.get(user).copied())
    }
}

impl DomainIndex for RatingIndex {
    fn name(&self) -> &'static str {
        "ratings"
    }

    fn apply_event(&self, event: &Event) {
        let EventKind::UserActivity { activity, data } = &event.kind else {
            return;
        };
        if activity != RATING_ACTIVITY {
            return;
        }

        let Some(value) = data.get("value").and_then(Value::as_i64) else {
            tracing::warn!(
                subject = %event.subject,
                user = %event.user,
                "Rating without an integer value, ignored"
            );
            return;
        };

        let subject = &event.subject;
        let mut state = self.state.lock();
        if let Some(id) = data.get("id").and_then(Value::as_u64) {
            let max = state
                .maximum_id
                .entry(subject.resource_type.clone())
                .or_insert(id);
            *max = (*max).max(id);
        }
        state
            .ratings
            .entry(subject.clone())
            .or_default()
            .insert(event.user.clone(), value);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
