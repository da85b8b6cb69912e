//! Replay statistics
//!
//! Collected while the stream client replays the log on startup:
//! - Event counts by type
//! - Pages read
//! - Throughput

use std::collections::HashMap;
use std::time::Duration;

use crate::types::{EventType, RecordedEvent};

/// What a full replay of the log did
#[derive(Debug, Clone, Default)]
pub struct ReplayStats {
    /// Events applied to the indices
    pub events: usize,
    /// Pages requested from the log
    pub pages: usize,
    /// Events by type
    pub events_by_type: HashMap<EventType, usize>,
    /// Position of the last replayed event
    pub last_position: Option<u64>,
    /// Wall time of the whole replay
    pub elapsed: Duration,
}

impl ReplayStats {
    /// Count one replayed event
    pub fn record(&mut self, recorded: &RecordedEvent) {
        self.events += 1;
        *self
            .events_by_type
            .entry(recorded.event.event_type())
            .or_insert(0) += 1;
        self.last_position = Some(recorded.position);
    }

    /// Number of replayed events of one type
    pub fn count(&self, event_type: EventType) -> usize {
        self.events_by_type.get(&event_type).copied().unwrap_or(0)
    }

    pub fn events_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }

    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Args, EntityId, Event, ResourceType};

    #[test]
    fn test_record_counts_by_type() {
        let page = EntityId::new(ResourceType::exhibit_page(), 0);
        let mut stats = ReplayStats::default();

        stats.record(&RecordedEvent::new(0, Event::created(page.clone(), "u", Args::new())));
        stats.record(&RecordedEvent::new(1, Event::created(page.clone(), "u", Args::new())));
        stats.record(&RecordedEvent::new(2, Event::deleted(page, "u")));

        assert_eq!(stats.events, 3);
        assert_eq!(stats.count(EventType::Created), 2);
        assert_eq!(stats.count(EventType::Deleted), 1);
        assert_eq!(stats.count(EventType::Updated), 0);
        assert_eq!(stats.last_position, Some(2));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(ReplayStats::format_size(500), "500 B");
        assert_eq!(ReplayStats::format_size(1536), "1.50 KB");
        assert_eq!(ReplayStats::format_size(1048576), "1.00 MB");
    }

    #[test]
    fn test_events_per_second_without_elapsed_time() {
        let stats = ReplayStats::default();
        assert_eq!(stats.events_per_second(), 0.0);
    }
}
