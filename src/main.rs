//! HiP Data Store admin tool
//!
//! ```text
//! datastore-admin replay
//! datastore-admin migrate <from> <to>
//! datastore-admin export-cache <path>
//! ```
//!
//! Configuration comes from `DATASTORE_*` environment variables, log
//! verbosity from `RUST_LOG`.

use std::env;
use std::error::Error;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use hip_datastore::event_store::{MigrationTool, ReplayStats};
use hip_datastore::{
    CacheProjector, DocumentStore, DomainIndex, EngineConfig, EntityIndex, EventStreamClient,
    FileEventLog, MediaIndex, RatingIndex, ReferencesIndex, ResourceRegistry,
};

type CliResult = Result<(), Box<dyn Error>>;

const USAGE: &str = "usage: datastore-admin <replay | migrate <from> <to> | export-cache <path>>";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = EngineConfig::from_env();
    let args: Vec<String> = env::args().skip(1).collect();

    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["replay"] => replay(&config),
        ["migrate", from, to] => migrate(&config, from, to),
        ["export-cache", path] => export_cache(&config, path),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Open the stream and replay it into every index
fn replay(config: &EngineConfig) -> CliResult {
    let registry = Arc::new(ResourceRegistry::standard());
    let log = Arc::new(FileEventLog::open(config)?);
    let size = fs::metadata(log.path()).map(|m| m.len()).unwrap_or(0);

    let entities = Arc::new(EntityIndex::new());
    let indices = vec![
        entities.clone() as Arc<dyn DomainIndex>,
        Arc::new(MediaIndex::new()) as Arc<dyn DomainIndex>,
        Arc::new(ReferencesIndex::new(registry.clone())) as Arc<dyn DomainIndex>,
        Arc::new(RatingIndex::new()) as Arc<dyn DomainIndex>,
    ];
    let (client, stats) = EventStreamClient::connect(log.clone(), indices, config)?;

    println!("stream:   {}", config.stream_name);
    println!("file:     {} ({})", log.path().display(), ReplayStats::format_size(size));
    println!("events:   {}", stats.events);
    println!("pages:    {}", stats.pages);
    println!(
        "version:  {}",
        client.version().map_or("empty".to_string(), |v| v.to_string())
    );
    println!(
        "elapsed:  {} ms ({:.0} events/s)",
        stats.elapsed.as_millis(),
        stats.events_per_second()
    );

    let mut by_type: Vec<_> = stats.events_by_type.iter().collect();
    by_type.sort_by_key(|(kind, _)| kind.to_string());
    for (kind, count) in by_type {
        println!("  {:<18} {}", kind.to_string(), count);
    }

    let mut types: Vec<_> = registry.types().collect();
    types.sort_by_key(|t| t.name().to_string());
    for resource_type in types {
        let max = entities
            .maximum_id(resource_type)
            .map_or("-".to_string(), |id| id.to_string());
        println!("  max {:<14} {}", resource_type.name(), max);
    }
    Ok(())
}

fn migrate(config: &EngineConfig, from: &str, to: &str) -> CliResult {
    let from: u32 = from.parse()?;
    let to: u32 = to.parse()?;

    let result = MigrationTool::new(config.clone()).migrate(from, to)?;
    for step in &result.steps {
        println!(
            "{} v{} -> v{}: {} events read, {} written",
            step.name, step.from, step.to, step.events_read, step.events_written
        );
    }
    println!("stream {} now at version {}", config.stream_name, result.to);
    Ok(())
}

/// Rebuild the cache from the log and write every document as JSONL
fn export_cache(config: &EngineConfig, path: &str) -> CliResult {
    let registry = Arc::new(ResourceRegistry::standard());
    let log = FileEventLog::open(config)?;

    let store = Arc::new(DocumentStore::new(registry.clone()));
    let projector = CacheProjector::new(registry, store.clone());
    let events = projector.rebuild(&log, config.page_size)?;

    let written = store.export_jsonl(path)?;
    println!("projected {} events, exported {} documents to {}", events, written, path);
    Ok(())
}
