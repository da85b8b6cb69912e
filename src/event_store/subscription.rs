//! Catch-up subscriptions
//!
//! A subscription delivers every committed event from a starting position
//! in commit order: first the history already in the log, then live events
//! from the log's broadcast feed. The live receiver is opened before any
//! history is read, so events committed while catching up are seen either
//! in the history pages or on the feed (duplicates are dropped by position).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::types::RecordedEvent;

use super::log::{EventLog, LogResult};

/// Ordered, gap-free feed of committed events from a position onward
pub struct CatchUpSubscription {
    log: Arc<dyn EventLog>,
    live: broadcast::Receiver<RecordedEvent>,
    pending: VecDeque<RecordedEvent>,
    next_position: u64,
    page_size: usize,
}

impl CatchUpSubscription {
    pub fn new(log: Arc<dyn EventLog>, from: u64, page_size: usize) -> Self {
        let live = log.subscribe();
        Self {
            log,
            live,
            pending: VecDeque::new(),
            next_position: from,
            page_size: page_size.max(1),
        }
    }

    /// Position of the next event this subscription will deliver
    pub fn position(&self) -> u64 {
        self.next_position
    }

    /// Wait for the next event
    ///
    /// The subscription keeps the log alive, so at the head of the log this
    /// waits until another event is committed. `Ok(None)` only comes back if
    /// the log implementation closes its feed.
    pub async fn next(&mut self) -> LogResult<Option<RecordedEvent>> {
        loop {
            if let Some(recorded) = self.pending.pop_front() {
                if recorded.position < self.next_position {
                    continue;
                }
                self.next_position = recorded.position + 1;
                return Ok(Some(recorded));
            }

            if self.is_behind_log() {
                let slice = self.log.read_forward(self.next_position, self.page_size)?;
                self.pending.extend(slice.events);
                if !self.pending.is_empty() {
                    continue;
                }
            }

            match self.live.recv().await {
                Ok(recorded) if recorded.position < self.next_position => {}
                Ok(recorded) if recorded.position == self.next_position => {
                    self.next_position += 1;
                    return Ok(Some(recorded));
                }
                Ok(recorded) => {
                    // Missed something; the log has it
                    tracing::debug!(
                        expected = self.next_position,
                        received = recorded.position,
                        "Gap on live feed, re-reading from log"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(
                        missed,
                        from = self.next_position,
                        "Subscriber lagged, re-reading from log"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if self.is_behind_log() {
                        continue;
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn is_behind_log(&self) -> bool {
        self.log
            .version()
            .map_or(false, |version| version >= self.next_position)
    }
}
