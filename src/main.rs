use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use wc_pipeline::config::record_limit;
use wc_pipeline::map_reduce_apps::{run_mapper, run_reducer};
use wc_pipeline::{Coordinator, PipelineConfig, SequentialMapReduce, WorkerKind};

/// Count words on stdin with parallel mapper and reducer workers.
///
/// Output is one "<word> <count>" line per distinct word, grouped in one
/// sorted block per reducer.
#[derive(Parser, Debug)]
#[command(name = "wc-pipeline", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Number of mapper workers
    #[arg(long, default_value_t = 4)]
    mappers: usize,

    /// Number of reducer workers
    #[arg(long, default_value_t = 2)]
    reducers: usize,

    /// How workers are run
    #[arg(long, value_enum, default_value_t = WorkerKind::Task)]
    workers: WorkerKind,

    /// Longest accepted input line in bytes, newline excluded
    #[arg(long, default_value_t = 1024)]
    max_line_len: usize,

    /// Buffer size of each in-memory worker pipe
    #[arg(long, default_value_t = 4096)]
    stream_capacity: usize,

    /// Records queued towards one reducer before routing waits
    #[arg(long, default_value_t = 1024)]
    reducer_queue_depth: usize,

    #[arg(long, default_value_t = 10)]
    startup_timeout_secs: u64,

    /// How long each worker may take to exit once its streams are closed
    #[arg(long, default_value_t = 30)]
    join_timeout_secs: u64,

    /// Count in a single task instead, printing one sorted table
    #[arg(long)]
    sequential: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one worker over stdin and stdout
    #[command(hide = true)]
    Worker {
        #[arg(value_enum)]
        role: WorkerRole,

        #[arg(long, default_value_t = 1024)]
        max_line_len: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WorkerRole {
    Map,
    Reduce,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            num_mappers: self.mappers,
            num_reducers: self.reducers,
            worker_kind: self.workers,
            max_line_len: self.max_line_len,
            stream_capacity: self.stream_capacity,
            reducer_queue_depth: self.reducer_queue_depth,
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            join_timeout: Duration::from_secs(self.join_timeout_secs),
            worker_program: None,
            worker_verbosity: self.verbose,
        }
    }
}

/// Logs go to stderr; stdout carries the word counts (or, in a worker, the
/// record stream). `RUST_LOG` overrides `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .init();
}

async fn run_worker(role: WorkerRole, max_line_len: usize) -> anyhow::Result<()> {
    PipelineConfig::default()
        .with_max_line_len(max_line_len)
        .validate()?;
    let input = tokio::io::stdin();
    let output = tokio::io::stdout();
    let span = info_span!("worker", role = ?role, pid = std::process::id());
    match role {
        WorkerRole::Map => {
            run_mapper(input, output, max_line_len)
                .instrument(span)
                .await?;
        }
        WorkerRole::Reduce => {
            run_reducer(input, output, record_limit(max_line_len))
                .instrument(span)
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(Command::Worker { role, max_line_len }) = &args.command {
        let role = *role;
        return run_worker(role, *max_line_len)
            .await
            .with_context(|| format!("{:?} worker failed", role));
    }

    let config = args.pipeline_config();
    config.validate()?;
    debug!(?config, "parsed configuration");

    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    let summary = if args.sequential {
        SequentialMapReduce::new(config.max_line_len)
            .run(input, &mut output)
            .await
    } else {
        Coordinator::new(config)?.run(input, &mut output).await
    }
    .context("word count failed")?;
    output.flush().await.context("flushing stdout")?;

    debug!(?summary, "done");
    Ok(())
}
