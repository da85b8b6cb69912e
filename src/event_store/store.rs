//! File-backed event log
//!
//! One JSONL file per stream and schema version
//! (`streams/<stream>-v<version>.jsonl`). Every append is written as a single
//! line and fsynced before it becomes visible to readers. A small pointer file
//! (`streams/<stream>.version`) names the authoritative schema version; it is
//! only ever switched by a migration.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::config::{EngineConfig, CURRENT_SCHEMA_VERSION};
use crate::types::{Event, RecordedEvent};
use crate::utils::{atomic_write, cleanup_temp_files};

use super::log::{EventBuffer, EventLog, ExpectedVersion, LogError, LogResult, ReadSlice};

/// Read the schema version pointer of the configured stream
///
/// Returns `None` when the stream has never been written.
pub fn read_version_pointer(config: &EngineConfig) -> LogResult<Option<u32>> {
    let path = config.version_pointer_path();
    if !path.exists() {
        // Streams written before pointers existed only have a v1 file
        if config.stream_path(1).exists() {
            return Ok(Some(1));
        }
        return Ok(None);
    }

    let content = fs::read_to_string(&path)?;
    let version = content
        .trim()
        .parse::<u32>()
        .map_err(|e| LogError::Corrupted {
            line: 1,
            reason: format!("invalid version pointer '{}': {}", content.trim(), e),
        })?;
    Ok(Some(version))
}

/// Atomically switch the stream's authoritative schema version
pub fn write_version_pointer(config: &EngineConfig, version: u32) -> LogResult<()> {
    atomic_write(config.version_pointer_path(), &version.to_string())?;
    Ok(())
}

/// Load every recorded event of a JSONL log file
///
/// Positions must be contiguous from zero; anything else means the file was
/// edited or truncated and is reported as corruption.
pub fn load_events(path: &Path) -> LogResult<Vec<RecordedEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let recorded = RecordedEvent::from_json_line(&line).map_err(|e| LogError::Corrupted {
            line: line_num + 1,
            reason: e.to_string(),
        })?;

        let expected = events.len() as u64;
        if recorded.position != expected {
            return Err(LogError::Corrupted {
                line: line_num + 1,
                reason: format!(
                    "expected position {}, found {}",
                    expected, recorded.position
                ),
            });
        }
        events.push(recorded);
    }

    Ok(events)
}

struct FileLogState {
    file: File,
    buffer: EventBuffer,
    /// Set when a failed append left bytes that could not be truncated
    poisoned: bool,
}

/// File operations an append needs to stay all-or-nothing
trait LogFile: Write {
    fn len(&self) -> io::Result<u64>;
    fn sync(&self) -> io::Result<()>;
    fn truncate(&self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_all()
    }
}

/// Write and fsync one line, or cut the file back to where it was
///
/// If the rollback fails too, `poisoned` is set and the file must not be
/// appended to again.
fn append_line<F: LogFile>(file: &mut F, poisoned: &mut bool, line: &str) -> io::Result<()> {
    let start = file.len()?;
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');

    let written = file.write_all(&bytes).and_then(|_| file.flush()).and_then(|_| file.sync());
    if let Err(e) = written {
        match file.truncate(start) {
            Ok(()) => tracing::warn!(error = %e, length = start, "Append failed, truncated log"),
            Err(truncate_error) => {
                *poisoned = true;
                tracing::error!(
                    error = %e,
                    truncate_error = %truncate_error,
                    "Append failed and the log could not be truncated"
                );
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Durable JSONL event log
pub struct FileEventLog {
    stream: String,
    path: PathBuf,
    state: RwLock<FileLogState>,
}

impl FileEventLog {
    /// Open (or create) the configured stream at the current schema version
    ///
    /// Fails with [`LogError::SchemaMismatch`] when the stream on disk is at
    /// an older version; run the migration first.
    pub fn open(config: &EngineConfig) -> LogResult<Self> {
        fs::create_dir_all(config.streams_dir())?;

        let cleaned = cleanup_temp_files(config.streams_dir())?;
        if cleaned > 0 {
            tracing::warn!(cleaned, "Removed temp files left by an interrupted write");
        }

        match read_version_pointer(config)? {
            Some(found) if found != CURRENT_SCHEMA_VERSION => {
                return Err(LogError::SchemaMismatch {
                    found,
                    required: CURRENT_SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => write_version_pointer(config, CURRENT_SCHEMA_VERSION)?,
        }

        Self::open_path(
            &config.stream_name,
            config.stream_path(CURRENT_SCHEMA_VERSION),
            config.feed_capacity,
        )
    }

    /// Open a log file directly, without consulting the version pointer
    pub fn open_path(
        stream: impl Into<String>,
        path: impl Into<PathBuf>,
        feed_capacity: usize,
    ) -> LogResult<Self> {
        let stream = stream.into();
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let events = load_events(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::info!(
            stream = %stream,
            path = %path.display(),
            events = events.len(),
            "Opened event log"
        );

        Ok(Self {
            state: RwLock::new(FileLogState {
                file,
                buffer: EventBuffer::new(stream.clone(), events, feed_capacity),
                poisoned: false,
            }),
            stream,
            path,
        })
    }

    /// Path of the backing JSONL file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileEventLog {
    fn stream_name(&self) -> &str {
        &self.stream
    }

    fn read_forward(&self, start: u64, page_size: usize) -> LogResult<ReadSlice> {
        Ok(self.state.read().buffer.read_forward(start, page_size))
    }

    fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        event: Event,
    ) -> LogResult<RecordedEvent> {
        let mut state = self.state.write();
        if state.poisoned {
            return Err(LogError::Poisoned(self.path.clone()));
        }
        let position = state.buffer.check(stream, expected)?;
        let recorded = RecordedEvent::new(position, event);

        let json_line = recorded.to_json_line()?;
        let FileLogState { file, poisoned, .. } = &mut *state;
        append_line(file, poisoned, &json_line)?;

        state.buffer.commit(recorded.clone());
        Ok(recorded)
    }

    fn version(&self) -> Option<u64> {
        self.state.read().buffer.version()
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.state.read().buffer.subscribe()
    }
}
