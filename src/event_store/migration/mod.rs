//! Stream migrations
//!
//! Rewrites a whole historical log from one schema version to the next:
//! 1. Reads every record of `streams/<stream>-v<from>.jsonl` in order
//! 2. Feeds them through the registered migration, which may carry state
//!    across the scan and emit more, fewer or different events
//! 3. Writes the emitted events to `streams/<stream>-v<to>.jsonl` atomically
//! 4. Switches the version pointer once every step succeeded
//!
//! The source log is never modified. Any untranslatable record aborts the
//! run: files written by earlier steps are removed and the pointer keeps
//! naming the old version.

mod flat_page_hierarchy;

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::PathBuf;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::types::{Event, RecordedEvent};
use crate::utils::atomic_write_with;

use super::log::LogError;
use super::store::{read_version_pointer, write_version_pointer};

pub use flat_page_hierarchy::{FlatPageHierarchy, LEGACY_PAGE_CREATED};

/// Errors that abort a migration
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Cannot translate record at position {position}: {reason}")]
    Untranslatable { position: u64, reason: String },

    #[error("No migration registered from version {from} toward {to}")]
    MissingMigration { from: u32, to: u32 },

    #[error("Stream is at version {}, migration starts at {expected}", .actual.map_or("none".to_string(), |v| v.to_string()))]
    VersionMismatch { expected: u32, actual: Option<u32> },

    #[error("Source log not found: {0}")]
    SourceNotFound(PathBuf),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One raw line of a source log, not yet interpreted
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Zero-based position in the source log
    pub position: u64,
    pub raw: Value,
}

impl SourceRecord {
    /// The `event.type` tag of the record
    pub fn kind(&self) -> Option<&str> {
        self.raw.get("event")?.get("type")?.as_str()
    }

    /// Decode the record into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MigrationError> {
        serde_json::from_value(self.raw.clone()).map_err(|e| self.untranslatable(e.to_string()))
    }

    pub fn untranslatable(&self, reason: impl Into<String>) -> MigrationError {
        MigrationError::Untranslatable {
            position: self.position,
            reason: reason.into(),
        }
    }
}

/// Receiver of migrated events
pub trait EventSink {
    fn emit(&mut self, event: Event) -> Result<(), MigrationError>;
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) -> Result<(), MigrationError> {
        self.push(event);
        Ok(())
    }
}

/// A transformation from schema version `from_version` to `to_version`
pub trait StreamMigration: Send + Sync {
    fn name(&self) -> &'static str;

    fn from_version(&self) -> u32;

    fn to_version(&self) -> u32 {
        self.from_version() + 1
    }

    /// Consume every source record in order and emit the new-shape events
    ///
    /// State carried across the scan lives in locals of this call.
    fn migrate(
        &self,
        source: &mut dyn Iterator<Item = Result<SourceRecord, MigrationError>>,
        sink: &mut dyn EventSink,
    ) -> Result<(), MigrationError>;
}

/// Known migrations, chained by version
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn StreamMigration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every migration of the data store
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FlatPageHierarchy));
        registry
    }

    pub fn register(&mut self, migration: Box<dyn StreamMigration>) -> &mut Self {
        self.migrations.push(migration);
        self
    }

    /// Migrations to run, in order, to get from `from` to `to`
    pub fn path(&self, from: u32, to: u32) -> Result<Vec<&dyn StreamMigration>, MigrationError> {
        if to <= from {
            return Err(MigrationError::MissingMigration { from, to });
        }

        let mut steps = Vec::new();
        let mut version = from;
        while version < to {
            let step = self
                .migrations
                .iter()
                .find(|m| m.from_version() == version && m.to_version() <= to)
                .ok_or(MigrationError::MissingMigration { from: version, to })?;
            version = step.to_version();
            steps.push(step.as_ref());
        }
        Ok(steps)
    }
}

/// Outcome of one migration step
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub name: &'static str,
    pub from: u32,
    pub to: u32,
    pub events_read: u64,
    pub events_written: u64,
}

/// Result of a migration run
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub from: u32,
    pub to: u32,
    pub steps: Vec<MigrationStep>,
}

/// Runs registered migrations against the configured stream
pub struct MigrationTool {
    config: EngineConfig,
    registry: MigrationRegistry,
}

impl MigrationTool {
    /// Create a tool with every standard migration
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, MigrationRegistry::standard())
    }

    pub fn with_registry(config: EngineConfig, registry: MigrationRegistry) -> Self {
        Self { config, registry }
    }

    /// Check if the stream on disk is older than `target`
    pub fn needs_migration(&self, target: u32) -> Result<bool, MigrationError> {
        Ok(read_version_pointer(&self.config)?.map_or(false, |v| v < target))
    }

    /// Migrate the stream from version `from` to version `to`
    ///
    /// The stream's version pointer must currently name `from`. On success
    /// it names `to`; on failure nothing authoritative changed.
    pub fn migrate(&self, from: u32, to: u32) -> Result<MigrationResult, MigrationError> {
        let actual = read_version_pointer(&self.config)?;
        if actual != Some(from) {
            return Err(MigrationError::VersionMismatch {
                expected: from,
                actual,
            });
        }

        let steps = self.registry.path(from, to)?;
        let mut written: Vec<PathBuf> = Vec::new();
        let mut reports = Vec::new();

        for step in steps {
            match self.run_step(step) {
                Ok(report) => {
                    written.push(self.config.stream_path(report.to));
                    reports.push(report);
                }
                Err(e) => {
                    for path in &written {
                        let _ = fs::remove_file(path);
                    }
                    tracing::error!(
                        migration = step.name(),
                        stream = %self.config.stream_name,
                        error = %e,
                        "Migration aborted, stream left at version {}",
                        from
                    );
                    return Err(e);
                }
            }
        }

        write_version_pointer(&self.config, to)?;
        tracing::info!(
            stream = %self.config.stream_name,
            from,
            to,
            "Stream migrated"
        );

        Ok(MigrationResult {
            from,
            to,
            steps: reports,
        })
    }

    fn run_step(&self, migration: &dyn StreamMigration) -> Result<MigrationStep, MigrationError> {
        let started = Instant::now();
        let source_path = self.config.stream_path(migration.from_version());
        let target_path = self.config.stream_path(migration.to_version());

        if !source_path.exists() {
            return Err(MigrationError::SourceNotFound(source_path));
        }

        let mut source = SourceReader::new(File::open(&source_path)?);
        let mut failure = None;
        let mut events_written = 0;

        let result = atomic_write_with(&target_path, |file| {
            let mut sink = JsonlSink::new(file);
            match migration.migrate(&mut source, &mut sink) {
                Ok(()) => {
                    events_written = sink.written;
                    Ok(())
                }
                Err(e) => {
                    failure = Some(e);
                    Err(io::Error::new(io::ErrorKind::Other, "migration aborted"))
                }
            }
        });

        if let Err(io_error) = result {
            return Err(failure.unwrap_or(MigrationError::Io(io_error)));
        }

        tracing::info!(
            migration = migration.name(),
            events_read = source.position,
            events_written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Migration step complete"
        );

        Ok(MigrationStep {
            name: migration.name(),
            from: migration.from_version(),
            to: migration.to_version(),
            events_read: source.position,
            events_written,
        })
    }
}

/// Reads source log lines as raw JSON records
struct SourceReader {
    lines: Lines<BufReader<File>>,
    position: u64,
}

impl SourceReader {
    fn new(file: File) -> Self {
        Self {
            lines: BufReader::new(file).lines(),
            position: 0,
        }
    }
}

impl Iterator for SourceReader {
    type Item = Result<SourceRecord, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(MigrationError::Io(e))),
            };
            if line.trim().is_empty() {
                continue;
            }

            let position = self.position;
            self.position += 1;
            return Some(match serde_json::from_str::<Value>(&line) {
                Ok(raw) => Ok(SourceRecord { position, raw }),
                Err(e) => Err(MigrationError::Untranslatable {
                    position,
                    reason: e.to_string(),
                }),
            });
        }
    }
}

/// Writes emitted events as recorded JSONL lines with fresh positions
struct JsonlSink<'a> {
    file: &'a mut File,
    written: u64,
}

impl<'a> JsonlSink<'a> {
    fn new(file: &'a mut File) -> Self {
        Self { file, written: 0 }
    }
}

impl EventSink for JsonlSink<'_> {
    fn emit(&mut self, event: Event) -> Result<(), MigrationError> {
        let line = RecordedEvent::new(self.written, event).to_json_line()?;
        writeln!(self.file, "{}", line)?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(u32);

    impl StreamMigration for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn from_version(&self) -> u32 {
            self.0
        }

        fn migrate(
            &self,
            source: &mut dyn Iterator<Item = Result<SourceRecord, MigrationError>>,
            sink: &mut dyn EventSink,
        ) -> Result<(), MigrationError> {
            for record in source {
                let recorded: RecordedEvent = record?.decode()?;
                sink.emit(recorded.event)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_registry_chains_steps() {
        let mut registry = MigrationRegistry::new();
        registry.register(Box::new(Noop(2))).register(Box::new(Noop(1)));

        let steps = registry.path(1, 3).unwrap();
        let versions: Vec<u32> = steps.iter().map(|s| s.from_version()).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_registry_reports_missing_step() {
        let registry = MigrationRegistry::standard();
        assert!(matches!(
            registry.path(2, 3),
            Err(MigrationError::MissingMigration { from: 2, to: 3 })
        ));
        assert!(matches!(
            registry.path(2, 2),
            Err(MigrationError::MissingMigration { .. })
        ));
    }

    #[test]
    fn test_source_record_kind() {
        let record = SourceRecord {
            position: 0,
            raw: serde_json::json!({"event": {"type": "deleted"}}),
        };
        assert_eq!(record.kind(), Some("deleted"));
    }
}
