use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Upper bound for `max_line_len` and `stream_capacity`.
pub const MAX_BUFFER_LEN: usize = 16 * 1024 * 1024;
/// Upper bound for `reducer_queue_depth`; the queue is allocated up front.
pub const MAX_QUEUE_DEPTH: usize = 1 << 20;

/// How workers are realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WorkerKind {
    /// tokio tasks connected by in-memory byte pipes
    #[default]
    Task,
    /// child processes of this binary connected by OS pipes
    Process,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_mappers: usize,
    pub num_reducers: usize,
    pub worker_kind: WorkerKind,
    /// Longest accepted input line, newline excluded.
    pub max_line_len: usize,
    /// Buffer size of each in-memory worker pipe.
    pub stream_capacity: usize,
    /// Records allowed in flight towards one reducer.
    pub reducer_queue_depth: usize,
    pub startup_timeout: Duration,
    pub join_timeout: Duration,
    /// Executable started for process workers; defaults to the current one.
    pub worker_program: Option<PathBuf>,
    /// `-v` count handed to process workers. `RUST_LOG` still wins, as it
    /// is inherited.
    pub worker_verbosity: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_mappers: 4,
            num_reducers: 2,
            worker_kind: WorkerKind::Task,
            max_line_len: 1024,
            stream_capacity: 4096,
            reducer_queue_depth: 1024,
            startup_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(30),
            worker_program: None,
            worker_verbosity: 0,
        }
    }
}

impl PipelineConfig {
    pub fn new(num_mappers: usize, num_reducers: usize) -> Self {
        Self {
            num_mappers,
            num_reducers,
            ..Self::default()
        }
    }

    pub fn with_worker_kind(mut self, kind: WorkerKind) -> Self {
        self.worker_kind = kind;
        self
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Longest record line a worker stream may carry: a word can be no
    /// longer than the line it came from, plus a space and a `u64` count.
    pub fn max_record_len(&self) -> usize {
        record_limit(self.max_line_len)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.num_mappers, "num_mappers"),
            (self.num_reducers, "num_reducers"),
            (self.max_line_len, "max_line_len"),
            (self.stream_capacity, "stream_capacity"),
            (self.reducer_queue_depth, "reducer_queue_depth"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(PipelineError::InvalidConfig(format!("{} must be at least 1", name)));
            }
        }
        let caps = [
            (self.max_line_len, MAX_BUFFER_LEN, "max_line_len"),
            (self.stream_capacity, MAX_BUFFER_LEN, "stream_capacity"),
            (self.reducer_queue_depth, MAX_QUEUE_DEPTH, "reducer_queue_depth"),
        ];
        for (value, cap, name) in caps {
            if value > cap {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must be at most {}, got {}",
                    name, cap, value
                )));
            }
        }
        if self.join_timeout.is_zero() || self.startup_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

pub fn record_limit(max_line_len: usize) -> usize {
    max_line_len.saturating_add(1 + 20)
}
