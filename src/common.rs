use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{PipelineError, Result};

/// Bytes read per call on any worker stream.
pub const CHUNK_SIZE: usize = 4096;

/// Writing end of a worker connection, owned by exactly one writer.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;
/// Reading end of a worker connection, owned by exactly one reader.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Mapper,
    Reducer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Mapper => f.write_str("mapper"),
            Role::Reducer => f.write_str("reducer"),
        }
    }
}

/// The coordinator's side of one worker: its input sink and output source.
pub struct Endpoints {
    pub input: ByteSink,
    pub output: ByteSource,
}

/// A sequential unit of execution that talks to the coordinator only
/// through its two byte streams.
///
/// Closing the input sink is the worker's sole end-of-input signal; the
/// worker closes its output when it is done, and `wait` observes it exit.
#[async_trait]
pub trait Worker: Send {
    fn id(&self) -> usize;

    fn role(&self) -> Role;

    /// Hands the coordinator's endpoints out. Returns `None` on later calls.
    fn take_endpoints(&mut self) -> Option<Endpoints>;

    /// Waits for the worker to exit, terminating it once `timeout` elapses.
    async fn wait(&mut self, timeout: Duration) -> Result<()>;
}

/// What one run did, logged at the end and returned to the caller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub lines_in: u64,
    pub records_routed: u64,
    pub malformed_dropped: u64,
    /// Reducers (or, sequentially, tables) that produced output.
    pub blocks_out: usize,
    pub bytes_out: u64,
}

#[derive(Debug)]
pub enum StreamEvent {
    Data(usize, Vec<u8>),
    Closed(usize),
}

/// Turns one byte source into a stream of chunks tagged with `id`, ending
/// with a single `Closed(id)` once the writer has gone away.
pub fn chunk_stream(id: usize, source: ByteSource) -> BoxStream<'static, io::Result<StreamEvent>> {
    stream::unfold(Some(source), move |state| async move {
        let mut source = state?;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match source.read(&mut chunk).await {
                Ok(0) => return Some((Ok(StreamEvent::Closed(id)), None)),
                Ok(n) => {
                    chunk.truncate(n);
                    return Some((Ok(StreamEvent::Data(id, chunk)), Some(source)));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

/// Reads once into `buf`, retrying interrupted reads. `Ok(0)` is end-of-stream.
pub async fn read_chunk<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        match source.read(buf).await {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Line reader over the pipeline's text input that refuses lines longer
/// than the configured limit instead of truncating them.
pub struct InputLines<R> {
    input: R,
    max_line_len: usize,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin> InputLines<R> {
    pub fn new(input: R, max_line_len: usize) -> Self {
        Self {
            input,
            max_line_len,
            line_no: 0,
        }
    }

    /// Replaces `line` with the next input line, newline included (one is
    /// added if the input ends without it). Returns `false` at end of input.
    pub async fn next_line(&mut self, line: &mut Vec<u8>) -> Result<bool> {
        line.clear();
        let limit = (self.max_line_len as u64).saturating_add(1);
        let n = (&mut self.input)
            .take(limit)
            .read_until(b'\n', line)
            .await
            .map_err(PipelineError::io("reading input"))?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        if line.last() != Some(&b'\n') {
            if n as u64 == limit {
                return Err(PipelineError::LineTooLong {
                    line: self.line_no,
                    max: self.max_line_len,
                });
            }
            line.push(b'\n');
        }
        Ok(true)
    }

    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}
