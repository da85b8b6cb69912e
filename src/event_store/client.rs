//! Event stream client
//!
//! Owns the write path of the engine. On connect it replays the whole log
//! into every registered index; afterwards it admits new events one at a
//! time: indices first, then the durable append.
//!
//! # Write Path
//!
//! ```text
//! append_event ─► writer lock ─► version pre-check ─► apply to indices ─► log.append(Exact(v))
//! ```
//!
//! The indices are updated before the log confirms the write. If the append
//! then fails the indices are ahead of the log. Any failure at that point,
//! a late conflict included, halts the client until it is rebuilt by replay.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::DomainIndex;
use crate::types::{Event, RecordedEvent};

use super::log::{EventLog, ExpectedVersion, LogError};
use super::stats::ReplayStats;
use super::subscription::CatchUpSubscription;

struct WriterState {
    /// Last position this client has applied
    version: Option<u64>,
    halted: bool,
}

/// Single logical writer over one event log
pub struct EventStreamClient {
    log: Arc<dyn EventLog>,
    indices: Vec<Arc<dyn DomainIndex>>,
    page_size: usize,
    writer: Mutex<WriterState>,
}

impl EventStreamClient {
    /// Replay the entire log into `indices` and return a ready client
    ///
    /// The log is read in pages of `config.page_size` from position zero
    /// until end of stream. Every event is applied to every index, in log
    /// order, before this returns.
    pub fn connect(
        log: Arc<dyn EventLog>,
        indices: Vec<Arc<dyn DomainIndex>>,
        config: &EngineConfig,
    ) -> EngineResult<(Self, ReplayStats)> {
        let page_size = config.page_size.max(1);
        let started = Instant::now();
        let mut stats = ReplayStats::default();
        let mut position = 0;

        loop {
            let slice = log.read_forward(position, page_size)?;
            stats.pages += 1;

            for recorded in &slice.events {
                for index in &indices {
                    index.apply_event(&recorded.event);
                }
                stats.record(recorded);
            }

            position = slice.next_position;
            if slice.is_end_of_stream {
                break;
            }
        }
        stats.elapsed = started.elapsed();

        tracing::info!(
            stream = %log.stream_name(),
            events = stats.events,
            pages = stats.pages,
            indices = indices.len(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Replayed event log"
        );

        let client = Self {
            writer: Mutex::new(WriterState {
                version: stats.last_position,
                halted: false,
            }),
            log,
            indices,
            page_size,
        };
        Ok((client, stats))
    }

    /// Admit one event
    ///
    /// Blocks until every index applied the event and the log confirmed the
    /// durable write. Returns the committed event with its position.
    pub fn append_event(&self, event: Event) -> EngineResult<RecordedEvent> {
        let mut writer = self.writer.lock();
        if writer.halted {
            return Err(EngineError::Halted);
        }

        let expected = ExpectedVersion::from_version(writer.version);
        let actual = self.log.version();
        if actual != writer.version {
            tracing::warn!(
                expected = %expected,
                actual = ?actual,
                "Log moved under this writer, rejecting append"
            );
            return Err(EngineError::Conflict { expected, actual });
        }

        for index in &self.indices {
            index.apply_event(&event);
        }

        let subject = event.subject.clone();
        let event_type = event.event_type();
        match self.log.append(self.log.stream_name(), expected, event) {
            Ok(recorded) => {
                writer.version = Some(recorded.position);
                tracing::debug!(
                    position = recorded.position,
                    subject = %subject,
                    event = %event_type,
                    "Appended event"
                );
                Ok(recorded)
            }
            Err(LogError::Conflict {
                expected, actual, ..
            }) => {
                writer.halted = true;
                tracing::error!(
                    subject = %subject,
                    event = %event_type,
                    expected = %expected,
                    actual = ?actual,
                    "Append conflicted after indices were updated; halting until replay"
                );
                Err(EngineError::Conflict { expected, actual })
            }
            Err(e) => {
                writer.halted = true;
                tracing::error!(
                    subject = %subject,
                    event = %event_type,
                    error = %e,
                    "Append failed after indices were updated; halting until replay"
                );
                Err(EngineError::Log(e))
            }
        }
    }

    /// Independent feed of committed events starting at `from`
    pub fn subscribe_catch_up(&self, from: u64) -> CatchUpSubscription {
        CatchUpSubscription::new(self.log.clone(), from, self.page_size)
    }

    /// Registered index of type `T`
    pub fn index<T: DomainIndex>(&self) -> Option<&T> {
        self.indices
            .iter()
            .find_map(|index| index.as_any().downcast_ref::<T>())
    }

    /// Last position this client applied, `None` before the first event
    pub fn version(&self) -> Option<u64> {
        self.writer.lock().version
    }

    pub fn is_halted(&self) -> bool {
        self.writer.lock().halted
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }
}
