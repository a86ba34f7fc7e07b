use std::future::Future;
use std::mem;
use std::time::Duration;

use futures::stream::{select_all, StreamExt};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, info_span, trace, Instrument};
use uuid::Uuid;

use crate::common::{
    chunk_stream, ByteSink, ByteSource, InputLines, Role, RunSummary, StreamEvent, CHUNK_SIZE,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

use super::shuffle::{ShuffleRouter, ShuffleStats};
use super::worker_pool::WorkerPool;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub blocks: usize,
    pub bytes: u64,
}

/// Drives one run: sets the topology up, feeds the mappers, shuffles,
/// drains the reducers and joins every worker.
pub struct Coordinator {
    config: PipelineConfig,
}

impl Coordinator {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run<R, W>(&self, input: R, output: &mut W) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = info_span!("pipeline", run = %Uuid::new_v4());
        self.run_inner(input, output).instrument(span).await
    }

    async fn run_inner<R, W>(&self, input: R, output: &mut W) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(
            mappers = self.config.num_mappers,
            reducers = self.config.num_reducers,
            kind = ?self.config.worker_kind,
            "starting pipeline"
        );

        let mut pool = self.setup().await?;
        let (mapper_sinks, mapper_sources) = pool.endpoints(Role::Mapper)?;
        let (reducer_sinks, reducer_sources) = pool.endpoints(Role::Reducer)?;

        let router = ShuffleRouter::new(
            mapper_sources,
            reducer_sinks,
            self.config.reducer_queue_depth,
            self.config.max_record_len(),
        );
        // distributing and shuffling overlap, otherwise a full mapper output
        // pipe would stall the mapper and with it the distributor
        let (lines_in, shuffle): (u64, ShuffleStats) =
            tokio::try_join!(self.distribute(input, mapper_sinks), router.run())?;
        debug!(lines_in, routed = shuffle.records_routed, "reducer inputs closed");

        let drained = self.drain_reducers(reducer_sources, output).await?;
        self.join(pool).await?;

        let summary = RunSummary {
            lines_in,
            records_routed: shuffle.records_routed,
            malformed_dropped: shuffle.malformed_dropped,
            blocks_out: drained.blocks,
            bytes_out: drained.bytes,
        };
        info!(
            lines = summary.lines_in,
            records = summary.records_routed,
            malformed = summary.malformed_dropped,
            blocks = summary.blocks_out,
            bytes = summary.bytes_out,
            "pipeline finished"
        );
        Ok(summary)
    }

    /// Starts all workers, giving up after the startup deadline.
    pub async fn setup(&self) -> Result<WorkerPool> {
        within_startup_deadline(self.config.startup_timeout, WorkerPool::spawn(&self.config)).await
    }

    /// Sends input lines to mappers round-robin, whole lines at a time, then
    /// closes every mapper input. Returns the number of lines sent.
    pub async fn distribute<R>(&self, input: R, mut sinks: Vec<ByteSink>) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        if sinks.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "no mapper to distribute to".to_string(),
            ));
        }
        let mut lines = InputLines::new(input, self.config.max_line_len);
        let mut line = Vec::with_capacity(self.config.max_line_len.min(CHUNK_SIZE) + 1);
        let mut next = 0;

        while lines.next_line(&mut line).await? {
            trace!(mapper = next, bytes = line.len(), "distributing line");
            sinks[next]
                .write_all(&line)
                .await
                .map_err(PipelineError::io("writing mapper input"))?;
            next = (next + 1) % sinks.len();
        }

        for sink in sinks.iter_mut() {
            sink.shutdown()
                .await
                .map_err(PipelineError::io("closing mapper input"))?;
        }
        debug!(lines = lines.lines_read(), "input exhausted, mapper inputs closed");
        Ok(lines.lines_read())
    }

    /// Copies every reducer's output to `output` until all have closed.
    ///
    /// Each reducer's bytes form one contiguous block. The first reducer to
    /// produce output streams straight through; bytes from the others are
    /// held back until the streaming one closes.
    pub async fn drain_reducers<W>(
        &self,
        sources: Vec<ByteSource>,
        output: &mut W,
    ) -> Result<DrainStats>
    where
        W: AsyncWrite + Unpin,
    {
        let mut blocks = BlockWriter::new(sources.len());
        let mut events = select_all(
            sources
                .into_iter()
                .enumerate()
                .map(|(id, source)| chunk_stream(id, source)),
        );

        while let Some(event) = events.next().await {
            match event.map_err(PipelineError::io("reading reducer output"))? {
                StreamEvent::Data(reducer, chunk) => {
                    blocks.data(reducer, chunk, output).await?;
                }
                StreamEvent::Closed(reducer) => {
                    debug!(reducer, "reducer output closed");
                    blocks.closed(reducer, output).await?;
                }
            }
        }
        blocks.finish(output).await
    }

    pub async fn join(&self, pool: WorkerPool) -> Result<()> {
        pool.join(self.config.join_timeout).await?;
        debug!("all workers exited");
        Ok(())
    }
}

async fn within_startup_deadline<T>(
    deadline: Duration,
    starting: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, starting).await {
        Ok(started) => started,
        Err(_) => Err(PipelineError::StartupTimeout(deadline)),
    }
}

/// Serializes concurrently arriving reducer outputs into contiguous blocks.
struct BlockWriter {
    active: Option<usize>,
    open: Vec<bool>,
    held: Vec<Vec<u8>>,
    produced: Vec<bool>,
    bytes: u64,
}

impl BlockWriter {
    fn new(reducers: usize) -> Self {
        Self {
            active: None,
            open: vec![true; reducers],
            held: vec![Vec::new(); reducers],
            produced: vec![false; reducers],
            bytes: 0,
        }
    }

    async fn data<W>(&mut self, reducer: usize, chunk: Vec<u8>, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.produced[reducer] = true;
        if *self.active.get_or_insert(reducer) == reducer {
            self.write(&chunk, output).await
        } else {
            self.held[reducer].extend_from_slice(&chunk);
            Ok(())
        }
    }

    async fn closed<W>(&mut self, reducer: usize, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.open[reducer] = false;
        if self.active != Some(reducer) {
            return Ok(());
        }
        self.active = None;

        // finished blocks first, then hand the stream to one still running
        for id in 0..self.held.len() {
            if !self.open[id] && !self.held[id].is_empty() {
                let block = mem::take(&mut self.held[id]);
                self.write(&block, output).await?;
            }
        }
        if let Some(next) = (0..self.held.len()).find(|&id| !self.held[id].is_empty()) {
            self.active = Some(next);
            let block = mem::take(&mut self.held[next]);
            self.write(&block, output).await?;
        }
        Ok(())
    }

    async fn write<W>(&mut self, bytes: &[u8], output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        output
            .write_all(bytes)
            .await
            .map_err(PipelineError::io("writing output"))?;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    async fn finish<W>(self, output: &mut W) -> Result<DrainStats>
    where
        W: AsyncWrite + Unpin,
    {
        debug_assert!(self.held.iter().all(Vec::is_empty));
        output
            .flush()
            .await
            .map_err(PipelineError::io("flushing output"))?;
        let blocks = self.produced.iter().filter(|p| **p).count();
        Ok(DrainStats {
            blocks,
            bytes: self.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    use crate::config::WorkerKind;

    fn coordinator(mappers: usize, reducers: usize) -> Coordinator {
        Coordinator::new(PipelineConfig::new(mappers, reducers)).unwrap()
    }

    #[test]
    fn invalid_topology_is_rejected_up_front() {
        assert!(matches!(
            Coordinator::new(PipelineConfig::new(0, 1)),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn huge_line_limit_is_rejected_before_any_worker_starts() {
        let config = PipelineConfig::new(1, 1).with_max_line_len(usize::MAX);
        assert!(matches!(
            Coordinator::new(config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn distribute_is_round_robin_by_whole_lines() {
        let coordinator = coordinator(2, 1);
        let (tx0, mut rx0) = tokio::io::duplex(1024);
        let (tx1, mut rx1) = tokio::io::duplex(1024);

        let lines = coordinator
            .distribute(&b"one\ntwo\nthree\nfour\nfive"[..], vec![Box::new(tx0), Box::new(tx1)])
            .await
            .unwrap();
        assert_eq!(lines, 5);

        let mut first = String::new();
        let mut second = String::new();
        rx0.read_to_string(&mut first).await.unwrap();
        rx1.read_to_string(&mut second).await.unwrap();
        assert_eq!(first, "one\nthree\nfive\n");
        assert_eq!(second, "two\nfour\n");
    }

    #[tokio::test]
    async fn distribute_stops_at_an_oversized_line() {
        let coordinator =
            Coordinator::new(PipelineConfig::new(1, 1).with_max_line_len(4)).unwrap();
        let (tx, _rx) = tokio::io::duplex(1024);

        let err = coordinator
            .distribute(&b"ok\ntoo long\n"[..], vec![Box::new(tx)])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LineTooLong { line: 2, max: 4 }));
    }

    #[tokio::test]
    async fn reducer_blocks_stay_contiguous() {
        let coordinator = coordinator(1, 2);
        let (mut r0, out0) = tokio::io::duplex(64);
        let (mut r1, out1) = tokio::io::duplex(64);

        let writers = tokio::spawn(async move {
            r0.write_all(b"a 1\n").await.unwrap();
            r1.write_all(b"x 1\n").await.unwrap();
            tokio::task::yield_now().await;
            r0.write_all(b"b 1\n").await.unwrap();
            r1.write_all(b"y 1\n").await.unwrap();
            drop(r1);
            tokio::task::yield_now().await;
            r0.write_all(b"c 1\n").await.unwrap();
            drop(r0);
        });

        let mut output = Vec::new();
        let stats = coordinator
            .drain_reducers(vec![Box::new(out0), Box::new(out1)], &mut output)
            .await
            .unwrap();
        writers.await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(
            text == "a 1\nb 1\nc 1\nx 1\ny 1\n" || text == "x 1\ny 1\na 1\nb 1\nc 1\n",
            "interleaved output: {:?}",
            text
        );
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.bytes, 20);
    }

    #[tokio::test]
    async fn silent_reducers_produce_no_block() {
        let coordinator = coordinator(1, 3);
        let sources: Vec<ByteSource> = vec![
            Box::new(Cursor::new(Vec::new())),
            Box::new(Cursor::new(b"w 1\n".to_vec())),
            Box::new(Cursor::new(Vec::new())),
        ];
        let mut output = Vec::new();
        let stats = coordinator.drain_reducers(sources, &mut output).await.unwrap();

        assert_eq!(output, b"w 1\n");
        assert_eq!(stats.blocks, 1);
    }

    #[tokio::test]
    async fn full_run_over_task_workers() {
        let coordinator = coordinator(2, 2);
        let mut output = Vec::new();
        let summary = coordinator
            .run(&b"the cat sat\nthe dog sat\n"[..], &mut output)
            .await
            .unwrap();

        // "the" lands on reducer 1, the rest on reducer 0; either may go first
        let text = String::from_utf8(output).unwrap();
        assert!(
            text == "cat 1\ndog 1\nsat 2\nthe 2\n" || text == "the 2\ncat 1\ndog 1\nsat 2\n",
            "unexpected output: {:?}",
            text
        );
        assert_eq!(summary.lines_in, 2);
        assert_eq!(summary.records_routed, 6);
        assert_eq!(summary.blocks_out, 2);
    }

    #[tokio::test]
    async fn startup_past_its_deadline_times_out() {
        let deadline = Duration::from_millis(20);
        let err = within_startup_deadline(deadline, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StartupTimeout(d) if d == deadline));
    }

    #[tokio::test]
    async fn startup_within_its_deadline_passes_the_result_through() {
        let started = within_startup_deadline(Duration::from_secs(5), async { Ok(7) }).await;
        assert_eq!(started.unwrap(), 7);
    }

    #[tokio::test]
    async fn startup_failure_is_reported() {
        let mut config = PipelineConfig::new(1, 1).with_worker_kind(WorkerKind::Process);
        config.worker_program = Some("/nonexistent/wc-pipeline-worker".into());
        config.startup_timeout = Duration::from_secs(5);
        let coordinator = Coordinator::new(config).unwrap();

        let mut output: Vec<u8> = Vec::new();
        let err = coordinator
            .run(&b"the cat\n"[..], &mut output)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }
}
