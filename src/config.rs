//! Engine configuration
//!
//! Defaults suit a local development setup; `from_env` overrides them from
//! `DATASTORE_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};

/// Name of the single stream every event is appended to
pub const DEFAULT_STREAM_NAME: &str = "main-stream";

/// Event schema version this engine reads and writes
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Largest page the log is asked for during replay
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Buffered live events per catch-up subscriber before it has to re-read the log
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Configuration for the event log, the stream client and migrations
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the data directory
    pub data_dir: PathBuf,
    /// Stream the engine reads and appends to
    pub stream_name: String,
    /// Events read per page during replay and catch-up
    pub page_size: usize,
    /// Capacity of the live broadcast feed
    pub feed_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read overrides from the environment
    ///
    /// `DATASTORE_DATA_DIR` is resolved against the current directory when
    /// relative. Unparsable numbers fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("DATASTORE_DATA_DIR") {
            let path = PathBuf::from(dir);
            config.data_dir = if path.is_absolute() {
                path
            } else {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            };
        }
        if let Ok(stream) = env::var("DATASTORE_STREAM") {
            if !stream.trim().is_empty() {
                config.stream_name = stream;
            }
        }
        if let Some(size) = parse_env("DATASTORE_PAGE_SIZE") {
            config.page_size = size;
        }
        if let Some(capacity) = parse_env("DATASTORE_FEED_CAPACITY") {
            config.feed_capacity = capacity;
        }

        config
    }

    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    /// Directory holding every stream file
    pub fn streams_dir(&self) -> PathBuf {
        self.data_dir.join("streams")
    }

    /// Log file for the configured stream at a schema version
    pub fn stream_path(&self, version: u32) -> PathBuf {
        self.streams_dir()
            .join(format!("{}-v{}.jsonl", self.stream_name, version))
    }

    /// File naming the authoritative schema version of the stream
    pub fn version_pointer_path(&self) -> PathBuf {
        self.streams_dir()
            .join(format!("{}.version", self.stream_name))
    }
}

fn parse_env(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.stream_name, "main-stream");
        assert_eq!(config.page_size, 4096);
    }

    #[test]
    fn test_stream_paths() {
        let config = EngineConfig::new("/srv/hip").with_stream_name("exhibits");
        assert_eq!(
            config.stream_path(2),
            PathBuf::from("/srv/hip/streams/exhibits-v2.jsonl")
        );
        assert_eq!(
            config.version_pointer_path(),
            PathBuf::from("/srv/hip/streams/exhibits.version")
        );
    }

    #[test]
    fn test_page_size_never_zero() {
        let config = EngineConfig::default().with_page_size(0);
        assert_eq!(config.page_size, 1);
    }
}
