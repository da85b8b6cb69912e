//! Event log contract and the in-memory log
//!
//! The log is the only source of truth: an append-only, ordered sequence of
//! events addressed by zero-based global position. It supports paged
//! forward reads, optimistic-concurrency appends and a live feed of newly
//! committed events.

use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::DEFAULT_FEED_CAPACITY;
use crate::types::{Event, RecordedEvent};

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log operations
#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stream is not at the version the writer expected
    #[error("Concurrency conflict on '{stream}': expected {expected}, found {}", display_version(*.actual))]
    Conflict {
        stream: String,
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Log corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },

    /// The stream on disk has an older schema and must be migrated first
    #[error("Stream is at schema version {found}, engine requires {required}")]
    SchemaMismatch { found: u32, required: u32 },

    /// A failed append could not be rolled back; the file may end in a torn line
    #[error("Log file {0} has an unrecoverable partial write; reopen after repair")]
    Poisoned(std::path::PathBuf),
}

fn display_version(version: Option<u64>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "empty stream".to_string(),
    }
}

/// Optimistic concurrency expectation for an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the current version
    Any,
    /// The stream must be empty
    NoStream,
    /// The last committed event must be at this position
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation matching a stream whose last position is `version`
    pub fn from_version(version: Option<u64>) -> Self {
        match version {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::NoStream,
        }
    }

    pub fn is_satisfied_by(self, version: Option<u64>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => version.is_none(),
            ExpectedVersion::Exact(v) => version == Some(v),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "empty stream"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// One page of a forward read
#[derive(Debug, Clone, Default)]
pub struct ReadSlice {
    pub events: Vec<RecordedEvent>,
    /// Position to continue reading from
    pub next_position: u64,
    pub is_end_of_stream: bool,
}

/// Append-only, ordered event log
pub trait EventLog: Send + Sync {
    /// Name of the stream this log holds
    fn stream_name(&self) -> &str;

    /// Read up to `page_size` events starting at `start`
    fn read_forward(&self, start: u64, page_size: usize) -> LogResult<ReadSlice>;

    /// Durably append one event
    ///
    /// Fails with [`LogError::Conflict`] when the stream is not at `expected`.
    fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        event: Event,
    ) -> LogResult<RecordedEvent>;

    /// Position of the last committed event, `None` for an empty stream
    fn version(&self) -> Option<u64>;

    /// Live feed of events committed after this call, in commit order
    fn subscribe(&self) -> broadcast::Receiver<RecordedEvent>;
}

/// Committed events plus the live feed, shared by the log implementations
///
/// Callers hold the surrounding write lock across `check` and `commit` so the
/// feed observes events in position order.
pub(crate) struct EventBuffer {
    stream: String,
    events: Vec<RecordedEvent>,
    feed: broadcast::Sender<RecordedEvent>,
}

impl EventBuffer {
    pub(crate) fn new(stream: impl Into<String>, events: Vec<RecordedEvent>, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            stream: stream.into(),
            events,
            feed,
        }
    }

    pub(crate) fn version(&self) -> Option<u64> {
        self.events.last().map(|e| e.position)
    }

    /// Validate stream name and expected version, returning the next position
    pub(crate) fn check(&self, stream: &str, expected: ExpectedVersion) -> LogResult<u64> {
        if stream != self.stream {
            return Err(LogError::UnknownStream(stream.to_string()));
        }

        let actual = self.version();
        if !expected.is_satisfied_by(actual) {
            return Err(LogError::Conflict {
                stream: self.stream.clone(),
                expected,
                actual,
            });
        }

        Ok(self.events.len() as u64)
    }

    pub(crate) fn commit(&mut self, recorded: RecordedEvent) {
        self.events.push(recorded.clone());
        // No receivers is fine: nobody is tailing yet
        let _ = self.feed.send(recorded);
    }

    pub(crate) fn read_forward(&self, start: u64, page_size: usize) -> ReadSlice {
        let len = self.events.len();
        let from = usize::try_from(start).unwrap_or(usize::MAX).min(len);
        let to = from.saturating_add(page_size.max(1)).min(len);

        ReadSlice {
            events: self.events[from..to].to_vec(),
            next_position: to as u64,
            is_end_of_stream: to >= len,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.feed.subscribe()
    }
}

/// Event log held entirely in memory
///
/// Used by tests and by tools that build a log before writing it out.
pub struct MemoryEventLog {
    stream: String,
    buffer: RwLock<EventBuffer>,
}

impl MemoryEventLog {
    pub fn new(stream: impl Into<String>) -> Self {
        Self::with_capacity(stream, DEFAULT_FEED_CAPACITY)
    }

    /// Create a log whose live feed buffers `capacity` events per subscriber
    pub fn with_capacity(stream: impl Into<String>, capacity: usize) -> Self {
        let stream = stream.into();
        Self {
            buffer: RwLock::new(EventBuffer::new(stream.clone(), Vec::new(), capacity)),
            stream,
        }
    }

    /// Number of committed events
    pub fn len(&self) -> usize {
        self.buffer.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every committed event
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.buffer.read().events.clone()
    }
}

impl EventLog for MemoryEventLog {
    fn stream_name(&self) -> &str {
        &self.stream
    }

    fn read_forward(&self, start: u64, page_size: usize) -> LogResult<ReadSlice> {
        Ok(self.buffer.read().read_forward(start, page_size))
    }

    fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        event: Event,
    ) -> LogResult<RecordedEvent> {
        let mut buffer = self.buffer.write();
        let position = buffer.check(stream, expected)?;
        let recorded = RecordedEvent::new(position, event);
        buffer.commit(recorded.clone());
        Ok(recorded)
    }

    fn version(&self) -> Option<u64> {
        self.buffer.read().version()
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.buffer.read().subscribe()
    }
}
