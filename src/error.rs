//! Engine-level errors

use thiserror::Error;

use crate::event_store::{ExpectedVersion, LogError};
use crate::validation::ValidationFailure;

/// Result type for stream client operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by the event stream client
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another writer appended since this client last saw the log
    #[error("Concurrency conflict: expected {expected}, log is at {}", display_version(*.actual))]
    Conflict {
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("Event log failure: {0}")]
    Log(#[source] LogError),

    /// An earlier infrastructure failure left the indices ahead of the log
    #[error("Engine halted after a log failure; restart to replay from the log")]
    Halted,

    #[error("{} reference validation failure(s)", .0.len())]
    Validation(Vec<ValidationFailure>),
}

fn display_version(version: Option<u64>) -> String {
    match version {
        Some(v) => format!("position {}", v),
        None => "empty stream".to_string(),
    }
}

impl From<LogError> for EngineError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Conflict {
                expected, actual, ..
            } => EngineError::Conflict { expected, actual },
            other => EngineError::Log(other),
        }
    }
}
