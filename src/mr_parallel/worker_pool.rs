use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::common::{ByteSink, ByteSource, Endpoints, Role, Worker};
use crate::config::{PipelineConfig, WorkerKind};
use crate::error::{PipelineError, Result};
use crate::map_reduce_apps::{run_mapper, run_reducer};

/// The fixed set of mappers and reducers for one run.
pub struct WorkerPool {
    pub mappers: Vec<Box<dyn Worker>>,
    pub reducers: Vec<Box<dyn Worker>>,
}

impl WorkerPool {
    /// Starts every worker. A worker that fails to start aborts the whole
    /// pool; the ones already running are torn down when it is dropped.
    pub async fn spawn(config: &PipelineConfig) -> Result<WorkerPool> {
        let program = match config.worker_kind {
            WorkerKind::Task => None,
            WorkerKind::Process => Some(match &config.worker_program {
                Some(path) => path.clone(),
                None => std::env::current_exe().map_err(|source| PipelineError::Spawn {
                    role: Role::Mapper,
                    id: 0,
                    source,
                })?,
            }),
        };

        let mut pool = WorkerPool {
            mappers: Vec::with_capacity(config.num_mappers),
            reducers: Vec::with_capacity(config.num_reducers),
        };
        for (role, count) in [
            (Role::Mapper, config.num_mappers),
            (Role::Reducer, config.num_reducers),
        ] {
            for id in 0..count {
                let worker: Box<dyn Worker> = match &program {
                    None => Box::new(TaskWorker::spawn(id, role, config)),
                    Some(program) => {
                        Box::new(ProcessWorker::spawn(id, role, program, config).await?)
                    }
                };
                match role {
                    Role::Mapper => pool.mappers.push(worker),
                    Role::Reducer => pool.reducers.push(worker),
                }
            }
        }
        debug!(
            mappers = pool.mappers.len(),
            reducers = pool.reducers.len(),
            kind = ?config.worker_kind,
            "worker pool started"
        );

        Ok(pool)
    }

    /// Collects the coordinator's endpoints for every worker of `role`,
    /// input sinks and output sources in worker order.
    pub fn endpoints(&mut self, role: Role) -> Result<(Vec<ByteSink>, Vec<ByteSource>)> {
        let workers = match role {
            Role::Mapper => &mut self.mappers,
            Role::Reducer => &mut self.reducers,
        };
        let mut sinks = Vec::with_capacity(workers.len());
        let mut sources = Vec::with_capacity(workers.len());
        for worker in workers.iter_mut() {
            let endpoints = worker
                .take_endpoints()
                .ok_or_else(|| PipelineError::WorkerFailed {
                    role,
                    id: worker.id(),
                    reason: "endpoints already taken".to_string(),
                })?;
            sinks.push(endpoints.input);
            sources.push(endpoints.output);
        }
        Ok((sinks, sources))
    }

    /// Waits for every worker to exit. Each one gets `timeout`; a worker
    /// that overruns it is terminated and fails the join.
    pub async fn join(self, timeout: Duration) -> Result<()> {
        let mut first_error = None;
        for mut worker in self.mappers.into_iter().chain(self.reducers) {
            if let Err(e) = worker.wait(timeout).await {
                warn!(
                    role = %worker.role(),
                    id = worker.id(),
                    error = %e,
                    "worker did not finish cleanly"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A worker running as a tokio task, wired to the coordinator through two
/// in-memory pipes. The task owns its ends of both pipes and the coordinator
/// owns the others, so dropping either side is seen as end-of-stream.
pub struct TaskWorker {
    id: usize,
    role: Role,
    endpoints: Option<Endpoints>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TaskWorker {
    pub fn spawn(id: usize, role: Role, config: &PipelineConfig) -> TaskWorker {
        let (coordinator_in, worker_in) = tokio::io::duplex(config.stream_capacity);
        let (worker_out, coordinator_out) = tokio::io::duplex(config.stream_capacity);
        let max_line_len = config.max_line_len;
        let max_record_len = config.max_record_len();

        let handle = tokio::spawn(
            async move {
                match role {
                    Role::Mapper => run_mapper(worker_in, worker_out, max_line_len)
                        .await
                        .map(|_| ()),
                    Role::Reducer => run_reducer(worker_in, worker_out, max_record_len)
                        .await
                        .map(|_| ()),
                }
            }
            .instrument(info_span!("worker", %role, id)),
        );

        TaskWorker {
            id,
            role,
            endpoints: Some(Endpoints {
                input: Box::new(coordinator_in),
                output: Box::new(coordinator_out),
            }),
            handle: Some(handle),
        }
    }
}

#[async_trait]
impl Worker for TaskWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn take_endpoints(&mut self) -> Option<Endpoints> {
        self.endpoints.take()
    }

    async fn wait(&mut self, timeout: Duration) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let outcome = match tokio::time::timeout(timeout, &mut *handle).await {
            Ok(outcome) => outcome,
            Err(_) => {
                handle.abort();
                self.handle = None;
                return Err(PipelineError::WorkerHung {
                    role: self.role,
                    id: self.id,
                    timeout,
                });
            }
        };
        self.handle = None;
        match outcome {
            Ok(result) => result.map_err(|e| PipelineError::WorkerFailed {
                role: self.role,
                id: self.id,
                reason: e.to_string(),
            }),
            Err(join_error) => Err(PipelineError::WorkerFailed {
                role: self.role,
                id: self.id,
                reason: join_error.to_string(),
            }),
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// A worker running as a child process of this binary (`worker map` or
/// `worker reduce`), wired through its stdin and stdout.
pub struct ProcessWorker {
    id: usize,
    role: Role,
    endpoints: Option<Endpoints>,
    child: Child,
}

impl ProcessWorker {
    pub async fn spawn(
        id: usize,
        role: Role,
        program: &Path,
        config: &PipelineConfig,
    ) -> Result<ProcessWorker> {
        let mut command = Command::new(program);
        command
            .args(worker_args(role, config))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // fork/exec can block, keep it off the coordinator's thread
        let mut child = tokio::task::spawn_blocking(move || command.spawn())
            .await
            .map_err(|e| PipelineError::Spawn {
                role,
                id,
                source: std::io::Error::other(e.to_string()),
            })?
            .map_err(|source| PipelineError::Spawn { role, id, source })?;

        let missing = |what: &str| PipelineError::Spawn {
            role,
            id,
            source: std::io::Error::other(format!("child {} was not captured", what)),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        debug!(%role, id, pid = ?child.id(), "spawned worker process");

        Ok(ProcessWorker {
            id,
            role,
            endpoints: Some(Endpoints {
                input: Box::new(stdin),
                output: Box::new(stdout),
            }),
            child,
        })
    }
}

/// Command line for a `worker` child of this binary.
pub fn worker_args(role: Role, config: &PipelineConfig) -> Vec<String> {
    let subcommand = match role {
        Role::Mapper => "map",
        Role::Reducer => "reduce",
    };
    let mut args = vec![
        "worker".to_string(),
        subcommand.to_string(),
        "--max-line-len".to_string(),
        config.max_line_len.to_string(),
    ];
    if config.worker_verbosity > 0 {
        args.push(format!("-{}", "v".repeat(usize::from(config.worker_verbosity))));
    }
    args
}

#[async_trait]
impl Worker for ProcessWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn take_endpoints(&mut self) -> Option<Endpoints> {
        self.endpoints.take()
    }

    async fn wait(&mut self, timeout: Duration) -> Result<()> {
        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.map_err(PipelineError::io("waiting for worker process"))?,
            Err(_) => {
                if let Err(e) = self.child.kill().await {
                    warn!(role = %self.role, id = self.id, error = %e, "failed to kill worker");
                }
                return Err(PipelineError::WorkerHung {
                    role: self.role,
                    id: self.id,
                    timeout,
                });
            }
        };
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::WorkerFailed {
                role: self.role,
                id: self.id,
                reason: format!("exited with {}", status),
            })
        }
    }
}
