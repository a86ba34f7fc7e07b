use async_channel::{Receiver, Sender};
use futures::stream::{select_all, StreamExt};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::common::{chunk_stream, ByteSink, ByteSource, Role, StreamEvent};
use crate::error::{PipelineError, Result};
use crate::partition::partition;
use crate::record::{LineBuffer, Record};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShuffleStats {
    pub records_routed: u64,
    pub malformed_dropped: u64,
    pub per_reducer: Vec<u64>,
}

/// Bounded queue in front of one reducer's input stream.
///
/// The router only ever waits for queue space, never on the reducer's pipe
/// itself; a dedicated writer task moves records from the queue into the
/// stream and closes it once the queue is closed and empty.
pub struct ReducerFeed {
    id: usize,
    tx: Sender<Record>,
    writer: JoinHandle<Result<u64>>,
}

impl ReducerFeed {
    pub fn spawn(id: usize, sink: ByteSink, depth: usize) -> ReducerFeed {
        let (tx, rx) = async_channel::bounded(depth);
        let writer = tokio::spawn(forward_records(rx, sink));
        ReducerFeed { id, tx, writer }
    }

    pub async fn send(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| PipelineError::WorkerFailed {
                role: Role::Reducer,
                id: self.id,
                reason: "input stream closed while records were still queued".to_string(),
            })
    }

    /// Closes the queue and waits until every queued record has been
    /// written and the reducer's input stream is closed.
    pub async fn close(self) -> Result<u64> {
        self.tx.close();
        match self.writer.await {
            Ok(result) => result,
            Err(join_error) => Err(PipelineError::WorkerFailed {
                role: Role::Reducer,
                id: self.id,
                reason: format!("input writer panicked: {}", join_error),
            }),
        }
    }
}

async fn forward_records(rx: Receiver<Record>, sink: ByteSink) -> Result<u64> {
    let mut writer = BufWriter::new(sink);
    let mut written = 0u64;
    let mut encoded = Vec::new();
    while let Ok(record) = rx.recv().await {
        encoded.clear();
        record.encode_into(&mut encoded);
        writer
            .write_all(&encoded)
            .await
            .map_err(PipelineError::io("writing reducer input"))?;
        written += 1;
        if rx.is_empty() {
            writer
                .flush()
                .await
                .map_err(PipelineError::io("flushing reducer input"))?;
        }
    }
    writer
        .shutdown()
        .await
        .map_err(PipelineError::io("closing reducer input"))?;
    Ok(written)
}

/// Moves records from every mapper output to the reducer that owns them.
pub struct ShuffleRouter {
    sources: Vec<ByteSource>,
    feeds: Vec<ReducerFeed>,
    max_record_len: usize,
}

impl ShuffleRouter {
    pub fn new(
        sources: Vec<ByteSource>,
        reducer_sinks: Vec<ByteSink>,
        queue_depth: usize,
        max_record_len: usize,
    ) -> ShuffleRouter {
        let feeds = reducer_sinks
            .into_iter()
            .enumerate()
            .map(|(id, sink)| ReducerFeed::spawn(id, sink, queue_depth))
            .collect();
        ShuffleRouter {
            sources,
            feeds,
            max_record_len,
        }
    }

    /// Runs until every mapper output has closed, then closes every reducer
    /// input.
    pub async fn run(self) -> Result<ShuffleStats> {
        let num_reducers = self.feeds.len();
        let mut buffers: Vec<Option<LineBuffer>> = (0..self.sources.len())
            .map(|_| Some(LineBuffer::new(self.max_record_len)))
            .collect();
        let mut stats = ShuffleStats {
            per_reducer: vec![0; num_reducers],
            ..ShuffleStats::default()
        };
        let mut active = self.sources.len();

        let mut events = select_all(
            self.sources
                .into_iter()
                .enumerate()
                .map(|(id, source)| chunk_stream(id, source)),
        );

        while let Some(event) = events.next().await {
            match event.map_err(PipelineError::io("reading mapper output"))? {
                StreamEvent::Data(mapper, chunk) => {
                    let Some(buffer) = buffers[mapper].as_mut() else {
                        continue;
                    };
                    for line in buffer.push(&chunk)?.iter() {
                        let Some(record) = Record::decode(line) else {
                            stats.malformed_dropped += 1;
                            trace!(
                                mapper,
                                line = %String::from_utf8_lossy(line),
                                "dropping malformed record"
                            );
                            continue;
                        };
                        let reducer = partition(&record.word, num_reducers);
                        self.feeds[reducer].send(record).await?;
                        stats.per_reducer[reducer] += 1;
                        stats.records_routed += 1;
                    }
                }
                StreamEvent::Closed(mapper) => {
                    active -= 1;
                    if let Some(tail) = buffers[mapper].take().and_then(LineBuffer::finish) {
                        stats.malformed_dropped += 1;
                        warn!(mapper, bytes = tail.len(), "mapper output ended inside a record");
                    }
                    debug!(mapper, active, "mapper output closed");
                }
            }
        }

        for feed in self.feeds {
            feed.close().await?;
        }
        debug!(
            routed = stats.records_routed,
            malformed = stats.malformed_dropped,
            "all mapper outputs drained, reducer inputs closed"
        );
        Ok(stats)
    }
}
