//! Cache projector
//!
//! Materializes a [`CacheDocument`] per entity from the committed event
//! feed. The projector keeps its own references index so document
//! reference lists can be refreshed without consulting the engine's indices.
//!
//! # Architecture
//!
//! ```text
//! CatchUpSubscription ──► CacheProjector::apply ──► DocumentStore
//!                                  │
//!                                  └──► ReferencesIndex (reference lists)
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::event_store::{CatchUpSubscription, EventLog, LogError};
use crate::index::ReferencesIndex;
use crate::types::{
    ActivityRecord, CacheDocument, ContentStatus, EntityId, Event, EventKind, RecordedEvent,
    ResourceRegistry, ResourceType,
};

use super::store::DocumentStore;

/// Errors raised while projecting one event
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("No document for {0}")]
    DocumentNotFound(EntityId),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(ResourceType),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

/// Folds committed events into a [`DocumentStore`]
pub struct CacheProjector {
    registry: Arc<ResourceRegistry>,
    store: Arc<DocumentStore>,
    references: ReferencesIndex,
    /// Position of the last applied event; held across every apply and rebuild
    position: Mutex<Option<u64>>,
}

impl CacheProjector {
    pub fn new(registry: Arc<ResourceRegistry>, store: Arc<DocumentStore>) -> Self {
        Self {
            references: ReferencesIndex::new(registry.clone()),
            registry,
            store,
            position: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Position of the last applied event
    pub fn position(&self) -> Option<u64> {
        *self.position.lock()
    }

    /// Apply one committed event
    ///
    /// Events at or before the last applied position are ignored, so a
    /// feed that redelivers is harmless. A failed event still advances the
    /// position.
    pub fn apply(&self, recorded: &RecordedEvent) -> Result<(), ProjectionError> {
        let mut position = self.position.lock();
        self.apply_at(&mut position, recorded).map(|_| ())
    }

    /// Apply with the position lock held; `Ok(false)` for a redelivery
    fn apply_at(
        &self,
        position: &mut Option<u64>,
        recorded: &RecordedEvent,
    ) -> Result<bool, ProjectionError> {
        if position.map_or(false, |p| recorded.position <= p) {
            return Ok(false);
        }
        *position = Some(recorded.position);

        self.project(recorded)?;
        Ok(true)
    }

    fn project(&self, recorded: &RecordedEvent) -> Result<(), ProjectionError> {
        let event = &recorded.event;
        let subject = &event.subject;

        match &event.kind {
            EventKind::Created { properties } => {
                let shape = self
                    .registry
                    .get(&subject.resource_type)
                    .ok_or_else(|| ProjectionError::UnknownResourceType(subject.resource_type.clone()))?;

                let mut fields = shape.defaults();
                fields.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));

                self.store.insert(CacheDocument {
                    id: subject.clone(),
                    owner: event.user.clone(),
                    status: ContentStatus::from_args(&fields),
                    timestamp: event.timestamp,
                    fields,
                    references: Vec::new(),
                    referencers: Vec::new(),
                    file: None,
                });
            }
            EventKind::Updated { properties } => {
                let shape = self
                    .registry
                    .get(&subject.resource_type)
                    .ok_or_else(|| ProjectionError::UnknownResourceType(subject.resource_type.clone()))?;

                let mut fields = shape.defaults();
                fields.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));

                self.modify(event, |doc| {
                    doc.status = ContentStatus::from_args(&fields);
                    doc.fields = fields;
                })?;
            }
            EventKind::PropertyChanged { property, value } => {
                self.modify(event, |doc| {
                    doc.fields.insert(property.clone(), value.clone());
                    if property == "status" {
                        doc.status = ContentStatus::from_args(&doc.fields);
                    }
                })?;
            }
            EventKind::Deleted => {
                self.modify(event, |doc| {
                    doc.status = ContentStatus::Deleted;
                    doc.fields.insert(
                        "status".to_string(),
                        Value::String(ContentStatus::Deleted.to_string()),
                    );
                })?;
            }
            EventKind::ReferenceAdded { .. } | EventKind::ReferenceRemoved { .. } => {
                // Edges may start at entities the cache has not seen yet
                if let Err(e) = self.modify(event, |_| {}) {
                    tracing::debug!(
                        position = recorded.position,
                        error = %e,
                        "Reference event without a document, updating edges only"
                    );
                }
            }
            EventKind::FileUpdated { file } => {
                self.modify(event, |doc| doc.file = Some(file.clone()))?;
            }
            EventKind::UserActivity { activity, data } => {
                self.store.push_activity(ActivityRecord {
                    position: recorded.position,
                    subject: subject.clone(),
                    user: event.user.clone(),
                    activity: activity.clone(),
                    data: data.clone(),
                    timestamp: event.timestamp,
                });
                return Ok(());
            }
        }

        let mut touched = self.references.apply(event);
        touched.insert(subject.clone());
        self.refresh_reference_lists(&touched);
        Ok(())
    }

    /// Mutate the subject's document and stamp it with the event time
    fn modify<F>(&self, event: &Event, f: F) -> Result<(), ProjectionError>
    where
        F: FnOnce(&mut CacheDocument),
    {
        let found = self.store.update(&event.subject, |doc| {
            f(doc);
            doc.timestamp = event.timestamp;
        });
        if found {
            Ok(())
        } else {
            Err(ProjectionError::DocumentNotFound(event.subject.clone()))
        }
    }

    fn refresh_reference_lists(&self, ids: &BTreeSet<EntityId>) {
        for id in ids {
            let references = self.references.references_of(id);
            let referencers = self.references.referencers_of(id);
            self.store.update(id, |doc| {
                doc.references = references;
                doc.referencers = referencers;
            });
        }
    }

    /// Tail `subscription` on a tokio task for the life of the process
    ///
    /// Projection errors are logged and skipped; the task ends only when the
    /// subscription does.
    pub fn run(self: Arc<Self>, mut subscription: CatchUpSubscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(from = subscription.position(), "Cache projector started");
            loop {
                match subscription.next().await {
                    Ok(Some(recorded)) => {
                        if let Err(e) = self.apply(&recorded) {
                            tracing::warn!(
                                position = recorded.position,
                                subject = %recorded.event.subject,
                                error = %e,
                                "Failed to project event"
                            );
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Cache subscription failed");
                        break;
                    }
                }
            }
            tracing::info!("Cache projector stopped");
        })
    }

    /// Drop every document and replay the whole log
    ///
    /// Concurrent `apply` calls, including a running tail, wait until the
    /// rebuild is done; events it already replayed are then skipped.
    /// Returns the number of events projected without error.
    pub fn rebuild(&self, log: &dyn EventLog, page_size: usize) -> Result<usize, ProjectionError> {
        let started = Instant::now();
        let mut last_applied = self.position.lock();
        self.store.clear();
        self.references.clear();
        *last_applied = None;

        let mut applied = 0;
        let mut position = 0;
        loop {
            let slice = log.read_forward(position, page_size.max(1))?;
            for recorded in &slice.events {
                match self.apply_at(&mut last_applied, recorded) {
                    Ok(true) => applied += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(position = recorded.position, error = %e, "Failed to project event");
                    }
                }
            }
            position = slice.next_position;
            if slice.is_end_of_stream {
                break;
            }
        }

        tracing::info!(
            events = applied,
            documents = self.store.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebuilt cache"
        );
        Ok(applied)
    }
}
