//! Word count role bodies. Both run over plain async byte streams, so the
//! same code serves in-process task workers and `worker` subprocesses.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, trace, warn};

use crate::aggregate::Aggregator;
use crate::common::{read_chunk, CHUNK_SIZE};
use crate::error::{PipelineError, Result};
use crate::record::{LineBuffer, Record};
use crate::transform;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapStats {
    pub lines: u64,
    pub words: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReduceStats {
    pub records: u64,
    pub malformed: u64,
    pub distinct: u64,
}

/// Reads text lines until end-of-input and writes `"<word> 1\n"` for every
/// word. Output is flushed after each chunk of input so the router never
/// waits on bytes parked in a buffer.
pub async fn run_mapper<R, W>(mut input: R, output: W, max_line_len: usize) -> Result<MapStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = LineBuffer::new(max_line_len);
    let mut writer = BufWriter::new(output);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut encoded = Vec::with_capacity(CHUNK_SIZE);
    let mut stats = MapStats::default();

    loop {
        let n = read_chunk(&mut input, &mut chunk)
            .await
            .map_err(PipelineError::io("reading mapper input"))?;
        if n == 0 {
            break;
        }
        for line in lines.push(&chunk[..n])?.iter() {
            map_line(line, max_line_len, &mut encoded, &mut stats)?;
        }
        if !encoded.is_empty() {
            writer
                .write_all(&encoded)
                .await
                .map_err(PipelineError::io("writing mapper output"))?;
            writer
                .flush()
                .await
                .map_err(PipelineError::io("flushing mapper output"))?;
            encoded.clear();
        }
    }

    if let Some(last) = lines.finish() {
        map_line(&last, max_line_len, &mut encoded, &mut stats)?;
        writer
            .write_all(&encoded)
            .await
            .map_err(PipelineError::io("writing mapper output"))?;
    }
    writer
        .shutdown()
        .await
        .map_err(PipelineError::io("closing mapper output"))?;

    debug!(lines = stats.lines, words = stats.words, "mapper drained its input");
    Ok(stats)
}

fn map_line(
    line: &[u8],
    max_line_len: usize,
    encoded: &mut Vec<u8>,
    stats: &mut MapStats,
) -> Result<()> {
    stats.lines += 1;
    if line.len() > max_line_len {
        return Err(PipelineError::LineTooLong {
            line: stats.lines,
            max: max_line_len,
        });
    }
    for word in transform::words(&String::from_utf8_lossy(line)) {
        Record::unit(word).encode_into(encoded);
        stats.words += 1;
    }
    Ok(())
}

/// Aggregates records until end-of-input, then writes the table sorted by
/// word and closes the output.
pub async fn run_reducer<R, W>(
    mut input: R,
    output: W,
    max_record_len: usize,
) -> Result<ReduceStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = LineBuffer::new(max_record_len);
    let mut table = Aggregator::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut stats = ReduceStats::default();

    loop {
        let n = read_chunk(&mut input, &mut chunk)
            .await
            .map_err(PipelineError::io("reading reducer input"))?;
        if n == 0 {
            break;
        }
        for line in lines.push(&chunk[..n])?.iter() {
            match Record::decode(line) {
                Some(record) => {
                    stats.records += 1;
                    table.add(record)?;
                }
                None => {
                    stats.malformed += 1;
                    trace!(line = %String::from_utf8_lossy(line), "dropping malformed record");
                }
            }
        }
    }
    if let Some(tail) = lines.finish() {
        stats.malformed += 1;
        warn!(bytes = tail.len(), "reducer input ended inside a record, dropping it");
    }

    stats.distinct = table.len() as u64;
    let mut writer = BufWriter::new(output);
    for record in table.into_sorted() {
        writer
            .write_all(record.encode().as_bytes())
            .await
            .map_err(PipelineError::io("writing reducer output"))?;
    }
    writer
        .shutdown()
        .await
        .map_err(PipelineError::io("closing reducer output"))?;

    debug!(
        records = stats.records,
        malformed = stats.malformed,
        distinct = stats.distinct,
        "reducer emitted its table"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    async fn map(input: &str) -> (String, MapStats) {
        let mut out = Vec::new();
        let stats = run_mapper(Cursor::new(input.as_bytes().to_vec()), &mut out, 1024)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    async fn reduce(input: &str) -> (String, ReduceStats) {
        let mut out = Vec::new();
        let stats = run_reducer(Cursor::new(input.as_bytes().to_vec()), &mut out, 64)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[tokio::test]
    async fn mapper_emits_one_unit_record_per_word() {
        let (out, stats) = map("the cat sat\nthe dog sat\n").await;
        assert_eq!(out, "the 1\ncat 1\nsat 1\nthe 1\ndog 1\nsat 1\n");
        assert_eq!(stats, MapStats { lines: 2, words: 6 });
    }

    #[tokio::test]
    async fn mapper_processes_unterminated_last_line() {
        let (out, stats) = map("one\ntwo three").await;
        assert_eq!(out, "one 1\ntwo 1\nthree 1\n");
        assert_eq!(stats.lines, 2);
    }

    #[tokio::test]
    async fn punctuation_only_line_yields_no_records() {
        let (out, stats) = map("... !!! ,,,\n").await;
        assert!(out.is_empty());
        assert_eq!(stats, MapStats { lines: 1, words: 0 });
    }

    #[tokio::test]
    async fn mapper_rejects_lines_past_the_limit() {
        let input = format!("{}\n", "a".repeat(40));
        let err = run_mapper(Cursor::new(input.into_bytes()), Vec::new(), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LineTooLong { line: 1, max: 16 }));
    }

    #[tokio::test]
    async fn mapper_closes_output_on_empty_input() {
        let (input_tx, input_rx) = tokio::io::duplex(64);
        let (output_tx, mut output_rx) = tokio::io::duplex(64);
        drop(input_tx);

        let stats = run_mapper(input_rx, output_tx, 64).await.unwrap();
        assert_eq!(stats, MapStats::default());

        let mut out = Vec::new();
        output_rx.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn reducer_sums_and_sorts() {
        let (out, stats) = reduce("the 1\ncat 1\nsat 1\nthe 1\ndog 1\nsat 1\n").await;
        assert_eq!(out, "cat 1\ndog 1\nsat 2\nthe 2\n");
        assert_eq!(stats.records, 6);
        assert_eq!(stats.distinct, 4);
    }

    #[tokio::test]
    async fn reducer_drops_malformed_lines() {
        let (out, stats) = reduce("a 1\nbroken\nb 0\na 2\nc x\ntrailing 1").await;
        assert_eq!(out, "a 3\n");
        assert_eq!(stats.records, 2);
        assert_eq!(stats.malformed, 4);
    }

    #[tokio::test]
    async fn reducer_reassembles_records_split_across_writes() {
        let (mut tx, rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            for piece in ["wo", "rd 1\nwor", "d 2\n", "x", "yz 1", "\n"] {
                tx.write_all(piece.as_bytes()).await.unwrap();
            }
        });

        let mut out = Vec::new();
        let stats = run_reducer(rx, &mut out, 64).await.unwrap();
        writer.await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "word 3\nxyz 1\n");
        assert_eq!(stats.malformed, 0);
    }

    #[tokio::test]
    async fn reducer_fails_cleanly_on_count_overflow() {
        let input = format!("a {}\na 1\n", u64::MAX);
        let err = run_reducer(Cursor::new(input.into_bytes()), Vec::new(), 64)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CountOverflow { ref word } if word == "a"));
    }

    #[tokio::test]
    async fn reducer_with_no_input_emits_nothing() {
        let (out, stats) = reduce("").await;
        assert!(out.is_empty());
        assert_eq!(stats, ReduceStats::default());
    }
}
