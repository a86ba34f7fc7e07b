use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info_span, Instrument};

use crate::aggregate::Aggregator;
use crate::common::{InputLines, RunSummary};
use crate::error::{PipelineError, Result};
use crate::record::Record;
use crate::transform;

/// Single-threaded word count over the same tokenizer and aggregation as the
/// parallel pipeline. Its output is one table sorted by word, which makes it
/// the oracle the parallel output is checked against.
pub struct SequentialMapReduce {
    max_line_len: usize,
}

impl SequentialMapReduce {
    pub fn new(max_line_len: usize) -> Self {
        Self { max_line_len }
    }

    /// Counts every word of `input` without writing anything.
    pub async fn count<R>(&self, input: R) -> Result<(Aggregator, u64)>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = InputLines::new(input, self.max_line_len);
        let mut line = Vec::new();
        let mut table = Aggregator::new();
        while lines.next_line(&mut line).await? {
            table.extend(
                transform::words(&String::from_utf8_lossy(&line))
                    .into_iter()
                    .map(Record::unit),
            )?;
        }
        Ok((table, lines.lines_read()))
    }

    pub async fn run<R, W>(&self, input: R, output: &mut W) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        async {
            let (table, lines_in) = self.count(input).await?;
            let records_routed = table.total();
            let blocks_out = usize::from(!table.is_empty());

            let mut writer = BufWriter::new(output);
            let mut bytes_out = 0u64;
            for record in table.into_sorted() {
                let line = record.encode();
                writer
                    .write_all(line.as_bytes())
                    .await
                    .map_err(PipelineError::io("writing output"))?;
                bytes_out += line.len() as u64;
            }
            writer
                .flush()
                .await
                .map_err(PipelineError::io("flushing output"))?;

            debug!(lines_in, words = records_routed, "sequential count finished");
            Ok::<_, PipelineError>(RunSummary {
                lines_in,
                records_routed,
                malformed_dropped: 0,
                blocks_out,
                bytes_out,
            })
        }
        .instrument(info_span!("sequential"))
        .await
    }
}
