//! Stream Migration Integration Tests
//!
//! Runs migrations against real stream files:
//! - Version 1 logs are rewritten to version 2 and the pointer switched
//! - An untranslatable record leaves the stream untouched
//! - The migrated stream opens and replays at the current version

use std::fs;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use hip_datastore::config::CURRENT_SCHEMA_VERSION;
use hip_datastore::event_store::{
    load_events, read_version_pointer, EventStreamClient, FileEventLog, LogError, MigrationError,
    MigrationTool, LEGACY_PAGE_CREATED,
};
use hip_datastore::index::{DomainIndex, EntityIndex, ReferencesIndex};
use hip_datastore::types::{EntityId, EventKind, EventType, ResourceRegistry, ResourceType};
use hip_datastore::EngineConfig;

fn write_v1(config: &EngineConfig, records: &[Value]) {
    fs::create_dir_all(config.streams_dir()).expect("Failed to create streams dir");
    let content: String = records
        .iter()
        .map(|record| format!("{}\n", record))
        .collect();
    fs::write(config.stream_path(1), content).expect("Failed to write v1 log");
}

fn exhibit_created(position: u64, id: u64) -> Value {
    json!({
        "position": position,
        "subject": {"type": "Exhibit", "id": id},
        "event": {"type": "created", "properties": {"name": "Dom", "status": "Draft"}},
        "user": "alice",
        "ts": "2017-06-01T10:00:00Z"
    })
}

fn legacy_page(position: u64, page: u64, exhibit: u64) -> Value {
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
    })
}

#[test]
fn test_migrates_exhibit_and_legacy_page() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = EngineConfig::new(dir.path());
    write_v1(&config, &[exhibit_created(0, 1), legacy_page(1, 1, 1)]);

    // The engine refuses the old schema until migrated
    assert!(matches!(
        FileEventLog::open(&config),
        Err(LogError::SchemaMismatch { found: 1, required: 2 })
    ));

    let tool = MigrationTool::new(config.clone());
    assert!(tool.needs_migration(CURRENT_SCHEMA_VERSION).unwrap());
    let result = tool.migrate(1, 2).expect("Migration failed");

    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].events_read, 2);
    assert_eq!(result.steps[0].events_written, 4);
    assert_eq!(read_version_pointer(&config).unwrap(), Some(2));
    assert!(!tool.needs_migration(CURRENT_SCHEMA_VERSION).unwrap());

    let events = load_events(&config.stream_path(2)).expect("Failed to load migrated log");
    let summary: Vec<(EventType, String)> = events
        .iter()
        .map(|r| (r.event.event_type(), r.event.subject.to_string()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (EventType::Created, "Exhibit/1".to_string()),
            (EventType::Created, "ExhibitPage/1".to_string()),
            (EventType::Updated, "Exhibit/1".to_string()),
            (EventType::ReferenceAdded, "Exhibit/1".to_string()),
        ]
    );

    match &events[0].event.kind {
        EventKind::Created { properties } => assert_eq!(properties["pages"], json!([])),
        other => panic!("unexpected {:?}", other),
    }
    match &events[2].event.kind {
        EventKind::Updated { properties } => assert_eq!(properties["pages"], json!([1])),
        other => panic!("unexpected {:?}", other),
    }
    match &events[3].event.kind {
        EventKind::ReferenceAdded { target } => {
            assert_eq!(target, &EntityId::new(ResourceType::exhibit_page(), 1))
        }
        other => panic!("unexpected {:?}", other),
    }

    // The source log is never modified
    let source = fs::read_to_string(config.stream_path(1)).unwrap();
    assert_eq!(source.lines().count(), 2);
}

#[test]
fn test_untranslatable_record_aborts_migration() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = EngineConfig::new(dir.path());
    write_v1(
        &config,
        &[exhibit_created(0, 1), legacy_page(1, 1, 1), legacy_page(2, 2, 9)],
    );
    fs::write(config.version_pointer_path(), "1").unwrap();

    let result = MigrationTool::new(config.clone()).migrate(1, 2);

    assert!(matches!(
        result,
        Err(MigrationError::Untranslatable { position: 2, .. })
    ));
    assert_eq!(read_version_pointer(&config).unwrap(), Some(1));
    assert!(!config.stream_path(2).exists());

    let leftovers: Vec<_> = fs::read_dir(config.streams_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().map_or(false, |e| e == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_migration_requires_matching_pointer() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = EngineConfig::new(dir.path());

    // Nothing written yet
    assert!(matches!(
        MigrationTool::new(config.clone()).migrate(1, 2),
        Err(MigrationError::VersionMismatch {
            expected: 1,
            actual: None
        })
    ));

    write_v1(&config, &[exhibit_created(0, 1)]);
    fs::write(config.version_pointer_path(), "2").unwrap();
    assert!(matches!(
        MigrationTool::new(config).migrate(1, 2),
        Err(MigrationError::VersionMismatch {
            expected: 1,
            actual: Some(2)
        })
    ));
}

#[test]
fn test_migrated_stream_replays() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = EngineConfig::new(dir.path());
    write_v1(
        &config,
        &[
            exhibit_created(0, 0),
            legacy_page(1, 0, 0),
            legacy_page(2, 1, 0),
            json!({
                "position": 3,
                "subject": {"type": "ExhibitPage", "id": 1},
                "event": {"type": "deleted"},
                "user": "alice",
                "ts": "2017-06-01T11:00:00Z"
            }),
        ],
    );

    MigrationTool::new(config.clone())
        .migrate(1, 2)
        .expect("Migration failed");

    let registry = Arc::new(ResourceRegistry::standard());
    let entities = Arc::new(EntityIndex::new());
    let references = Arc::new(ReferencesIndex::new(registry));
    let log = Arc::new(FileEventLog::open(&config).expect("Failed to open migrated log"));
    let (client, stats) = EventStreamClient::connect(
        log,
        vec![
            entities.clone() as Arc<dyn DomainIndex>,
            references.clone() as Arc<dyn DomainIndex>,
        ],
        &config,
    )
    .expect("Failed to replay migrated log");

    // exhibit, 2 x (page + exhibit update), page delete, one surviving reference
    assert_eq!(stats.events, 7);
    assert_eq!(stats.count(EventType::ReferenceAdded), 1);
    assert_eq!(client.version(), Some(6));

    let exhibit = EntityId::new(ResourceType::exhibit(), 0);
    let page0 = EntityId::new(ResourceType::exhibit_page(), 0);
    assert_eq!(references.references_of(&exhibit), vec![page0.clone()]);
    assert!(references.is_used(&page0));
    assert!(!entities.exists(&ResourceType::exhibit_page(), 1));
    assert_eq!(entities.next_id(&ResourceType::exhibit_page()), 2);
}
