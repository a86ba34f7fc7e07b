//! Word count over a fixed topology of concurrent mapper and reducer
//! workers connected only by byte streams.

mod coordinator;
mod shuffle;
mod worker_pool;

pub use coordinator::{Coordinator, DrainStats};
pub use shuffle::{ReducerFeed, ShuffleRouter, ShuffleStats};
pub use worker_pool::{ProcessWorker, TaskWorker, WorkerPool};
