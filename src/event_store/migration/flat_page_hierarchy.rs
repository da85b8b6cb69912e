//! Version 1 → 2: flat exhibit page hierarchy
//!
//! In version 1 a page was created inside one exhibit
//! (`page_created_with_exhibit_id`) and exhibits did not list their pages.
//! From version 2 on pages are standalone and exhibits reference them
//! through their `pages` field, so a page can appear in several exhibits.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Args, EntityId, Event, EventKind, RecordedEvent, ResourceType};

use super::{EventSink, MigrationError, SourceRecord, StreamMigration};

/// Event tag of the version 1 page creation
pub const LEGACY_PAGE_CREATED: &str = "page_created_with_exhibit_id";

const MIGRATION_USER: &str = "migration";

#[derive(Debug, Deserialize)]
struct LegacyPageCreated {
    exhibit_id: u64,
    #[serde(default)]
    properties: Args,
}

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    subject: EntityId,
    event: LegacyPageCreated,
    user: String,
    ts: DateTime<Utc>,
}

/// Splits legacy page creation into page creation plus exhibit update
pub struct FlatPageHierarchy;

fn page_ids(args: &Args) -> Vec<u64> {
    match args.get("pages") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_u64).collect(),
        _ => Vec::new(),
    }
}

impl StreamMigration for FlatPageHierarchy {
    fn name(&self) -> &'static str {
        "flat_page_hierarchy"
    }

    fn from_version(&self) -> u32 {
        1
    }

    fn migrate(
        &self,
        source: &mut dyn Iterator<Item = Result<SourceRecord, MigrationError>>,
        sink: &mut dyn EventSink,
    ) -> Result<(), MigrationError> {
        let exhibit_type = ResourceType::exhibit();
        let page_type = ResourceType::exhibit_page();

        // Current arguments of every live exhibit
        let mut exhibits: BTreeMap<u64, Args> = BTreeMap::new();
        let mut deleted_pages: BTreeSet<u64> = BTreeSet::new();
        let mut last_timestamp: Option<DateTime<Utc>> = None;

        for record in source {
            let record = record?;

            if record.kind() == Some(LEGACY_PAGE_CREATED) {
                let legacy: LegacyRecord = record.decode()?;
                if legacy.subject.resource_type != page_type {
                    return Err(record.untranslatable(format!(
                        "{} on {}",
                        LEGACY_PAGE_CREATED, legacy.subject
                    )));
                }
                let exhibit_id = legacy.event.exhibit_id;
                let exhibit_args = exhibits.get_mut(&exhibit_id).ok_or_else(|| {
                    record.untranslatable(format!("page refers to unknown exhibit {}", exhibit_id))
                })?;

                let mut pages = page_ids(exhibit_args);
                pages.push(legacy.subject.id);
                exhibit_args.insert("pages".to_string(), Value::from(pages));

                sink.emit(
                    Event::created(legacy.subject.clone(), legacy.user.clone(), legacy.event.properties)
                        .with_timestamp(legacy.ts),
                )?;
                sink.emit(
                    Event::updated(
                        EntityId::new(exhibit_type.clone(), exhibit_id),
                        legacy.user,
                        exhibit_args.clone(),
                    )
                    .with_timestamp(legacy.ts),
                )?;
                last_timestamp = Some(legacy.ts);
                continue;
            }

            let mut event = record.decode::<RecordedEvent>()?.event;
            let id = event.subject.id;

            if event.subject.resource_type == exhibit_type {
                match &mut event.kind {
                    EventKind::Created { properties } => {
                        if !matches!(properties.get("pages"), Some(Value::Array(_))) {
                            properties.insert("pages".to_string(), Value::Array(Vec::new()));
                        }
                        exhibits.insert(id, properties.clone());
                    }
                    EventKind::Updated { properties } => {
                        // Version 1 updates never carry pages; keep the ones collected so far
                        if !properties.contains_key("pages") {
                            let pages = exhibits.get(&id).map(page_ids).unwrap_or_default();
                            properties.insert("pages".to_string(), Value::from(pages));
                        }
                        exhibits.insert(id, properties.clone());
                    }
                    EventKind::PropertyChanged { property, value } => {
                        if let Some(args) = exhibits.get_mut(&id) {
                            args.insert(property.clone(), value.clone());
                        }
                    }
                    EventKind::Deleted => {
                        exhibits.remove(&id);
                    }
                    _ => {}
                }
            } else if event.subject.resource_type == page_type
                && matches!(event.kind, EventKind::Deleted)
            {
                deleted_pages.insert(id);
            }

            last_timestamp = Some(event.timestamp);
            sink.emit(event)?;
        }

        // Exhibits did not reference their pages before; add the edges explicitly
        let Some(timestamp) = last_timestamp else {
            return Ok(());
        };
        for (exhibit_id, args) in &exhibits {
            let exhibit = EntityId::new(exhibit_type.clone(), *exhibit_id);
            for page_id in page_ids(args) {
                if deleted_pages.contains(&page_id) {
                    continue;
                }
                sink.emit(
                    Event::reference_added(
                        exhibit.clone(),
                        EntityId::new(page_type.clone(), page_id),
                        MIGRATION_USER,
                    )
                    .with_timestamp(timestamp),
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(position: u64, raw: Value) -> Result<SourceRecord, MigrationError> {
        Ok(SourceRecord { position, raw })
    }

    fn run(records: Vec<Result<SourceRecord, MigrationError>>) -> Result<Vec<Event>, MigrationError> {
        let mut sink: Vec<Event> = Vec::new();
        FlatPageHierarchy.migrate(&mut records.into_iter(), &mut sink)?;
        Ok(sink)
    }

    fn exhibit_created(position: u64, id: u64) -> Result<SourceRecord, MigrationError> {
        record(
            position,
            json!({
                "position": position,
                "subject": {"type": "Exhibit", "id": id},
                "event": {"type": "created", "properties": {"name": "Dom", "status": "Draft"}},
                "user": "alice",
                "ts": "2017-06-01T10:00:00Z"
            }),
        )
    }

    fn legacy_page(position: u64, page: u64, exhibit: u64) -> Result<SourceRecord, MigrationError> {
        record(
            position,
            json!({
                "position": position,
                "subject": {"type": "ExhibitPage", "id": page},
                "event": {
                    "type": LEGACY_PAGE_CREATED,
                    "exhibit_id": exhibit,
                    "properties": {"title": "Intro"}
                },
                "user": "alice",
                "ts": "2017-06-01T10:05:00Z"
            }),
        )
    }

    #[test]
    fn test_exhibit_without_pages_gets_empty_list() {
        let events = run(vec![exhibit_created(0, 1)]).unwrap();

        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Created { properties } => assert_eq!(properties["pages"], json!([])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_legacy_page_is_split() {
        let events = run(vec![exhibit_created(0, 1), legacy_page(1, 4, 1)]).unwrap();

        let kinds: Vec<_> = events.iter().map(|e| (e.event_type(), e.subject.to_string())).collect();
        assert_eq!(
            kinds,
            vec![
                (crate::types::EventType::Created, "Exhibit/1".to_string()),
                (crate::types::EventType::Created, "ExhibitPage/4".to_string()),
                (crate::types::EventType::Updated, "Exhibit/1".to_string()),
                (crate::types::EventType::ReferenceAdded, "Exhibit/1".to_string()),
            ]
        );
        match &events[2].kind {
            EventKind::Updated { properties } => {
                assert_eq!(properties["pages"], json!([4]));
                assert_eq!(properties["name"], json!("Dom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_deleted_exhibit_gets_no_references() {
        let deleted = record(
            2,
            json!({
                "position": 2,
                "subject": {"type": "Exhibit", "id": 1},
                "event": {"type": "deleted"},
                "user": "alice",
                "ts": "2017-06-02T10:00:00Z"
            }),
        );

        let events = run(vec![exhibit_created(0, 1), legacy_page(1, 4, 1), deleted]).unwrap();

        assert_eq!(events.len(), 4);
        assert!(events
            .iter()
            .all(|e| e.event_type() != crate::types::EventType::ReferenceAdded));
    }

    #[test]
    fn test_page_of_unknown_exhibit_is_untranslatable() {
        let result = run(vec![legacy_page(0, 4, 9)]);
        assert!(matches!(
            result,
            Err(MigrationError::Untranslatable { position: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_event_kind_is_untranslatable() {
        let bogus = record(
            0,
            json!({
                "position": 0,
                "subject": {"type": "Exhibit", "id": 1},
                "event": {"type": "exhibit_teleported"},
                "user": "alice",
                "ts": "2017-06-02T10:00:00Z"
            }),
        );
        assert!(matches!(
            run(vec![bogus]),
            Err(MigrationError::Untranslatable { position: 0, .. })
        ));
    }
}
