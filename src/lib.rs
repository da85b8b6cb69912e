//! HiP Data Store Engine
//!
//! Event-sourced indexing and read-model engine. Every piece of queryable
//! state is derived from one append-only log of domain events.
//!
//! # Modules
//!
//! - `types`: events, entity ids, resource shapes and cache documents
//! - `event_store`: event logs, the stream client, catch-up subscriptions
//!   and stream migrations
//! - `index`: in-memory domain indices rebuilt by replay
//! - `cache`: the cache projector and its queryable document store
//! - `validation`: reference checks run before an event is built
//! - `config`: engine configuration
//! - `utils`: timestamps and atomic file writes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hip_datastore::{
//!     DomainIndex, EngineConfig, EntityIndex, Event, EventStreamClient, FileEventLog,
//!     ResourceType, EntityId, Args,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env();
//!     let log = Arc::new(FileEventLog::open(&config)?);
//!     let entities = Arc::new(EntityIndex::new());
//!     let (client, _stats) = EventStreamClient::connect(
//!         log,
//!         vec![entities.clone() as Arc<dyn DomainIndex>],
//!         &config,
//!     )?;
//!
//!     let id = entities.next_id(&ResourceType::exhibit());
//!     client.append_event(Event::created(
//!         EntityId::new(ResourceType::exhibit(), id),
//!         "admin",
//!         Args::new(),
//!     ))?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod event_store;
pub mod index;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export commonly used items at crate root
pub use cache::{CacheProjector, DocumentQuery, DocumentStore};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use event_store::{
    CatchUpSubscription, EventLog, EventStreamClient, ExpectedVersion, FileEventLog,
    MemoryEventLog, MigrationTool,
};
pub use index::{DomainIndex, EntityIndex, MediaIndex, RatingIndex, ReferencesIndex};
pub use types::{
    Args, CacheDocument, ContentStatus, EntityId, Event, EventKind, MediaType, RecordedEvent,
    ResourceRegistry, ResourceType,
};
pub use validation::ReferenceValidator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
