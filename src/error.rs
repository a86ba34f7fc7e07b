use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::common::Role;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Everything that can abort a pipeline run.
///
/// Malformed records and end-of-stream are not errors: the former are
/// dropped where they are decoded, the latter is the protocol's own
/// termination signal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start {role} {id}: {source}")]
    Spawn {
        role: Role,
        id: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker topology was not ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("line too long: input line {line} is longer than {max} bytes")]
    LineTooLong { line: u64, max: usize },

    #[error("stream carried {len} bytes without a newline, limit is {max}")]
    FrameTooLong { len: usize, max: usize },

    #[error("count for word {word:?} overflowed u64")]
    CountOverflow { word: String },

    #[error("i/o error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{role} {id} failed: {reason}")]
    WorkerFailed {
        role: Role,
        id: usize,
        reason: String,
    },

    #[error("{role} {id} did not terminate within {timeout:?} after its streams were closed")]
    WorkerHung {
        role: Role,
        id: usize,
        timeout: Duration,
    },
}

impl PipelineError {
    pub fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| PipelineError::Io { context, source }
    }
}
