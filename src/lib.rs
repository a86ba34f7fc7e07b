//! Parallel word count: a coordinator feeds text lines round-robin to a
//! fixed set of mapper workers, routes their `word count` records by hash
//! to reducer workers, and concatenates the reducers' sorted tables.
//!
//! Workers see nothing but two byte streams, so they run either as tokio
//! tasks over in-memory pipes or as `worker` child processes of the binary.

pub mod aggregate;
pub mod common;
pub mod config;
pub mod error;
pub mod map_reduce_apps;
pub mod map_reduce_seq;
pub mod mr_parallel;
pub mod partition;
pub mod record;
pub mod transform;

pub use common::{Role, RunSummary, Worker};
pub use config::{PipelineConfig, WorkerKind};
pub use error::{PipelineError, Result};
pub use map_reduce_seq::SequentialMapReduce;
pub use mr_parallel::Coordinator;
