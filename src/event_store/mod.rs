//! Event store
//!
//! - `EventLog`: append-only positional log with optimistic concurrency
//! - `FileEventLog` / `MemoryEventLog`: durable JSONL log and in-process log
//! - `EventStreamClient`: replays the log into domain indices, serializes writes
//! - `CatchUpSubscription`: history first, then live events, in order
//! - `MigrationTool`: rewrites a stream from one schema version to the next
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌───────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ caller  │───►│ version check │───►│ apply to all │───►│ append with  │
//! │ event   │    │ (writer lock) │    │ indices      │    │ expected ver │
//! └─────────┘    └───────────────┘    └──────────────┘    └──────┬───────┘
//!                                                                │ feed
//! Read Path (Startup):                                           ▼
//! ┌───────────────┐    ┌─────────────────┐            ┌──────────────────┐
//! │ read_forward  │───►│ apply each page │───► Ready  │ subscriptions /  │
//! │ page by page  │    │ to all indices  │            │ cache projector  │
//! └───────────────┘    └─────────────────┘            └──────────────────┘
//! ```

mod client;
mod log;
mod migration;
mod stats;
mod store;
mod subscription;

pub use client::EventStreamClient;
pub use log::{EventLog, ExpectedVersion, LogError, LogResult, MemoryEventLog, ReadSlice};
pub use migration::{
    EventSink, FlatPageHierarchy, MigrationError, MigrationRegistry, MigrationResult,
    MigrationStep, MigrationTool, SourceRecord, StreamMigration, LEGACY_PAGE_CREATED,
};
pub use stats::ReplayStats;
pub use store::{load_events, read_version_pointer, write_version_pointer, FileEventLog};
pub use subscription::CatchUpSubscription;
