//! Wire records (`"<word> <count>\n"`) and the reassembly buffer that turns
//! arbitrarily split byte chunks back into whole lines.

use std::fmt;

use memchr::{memchr_iter, memrchr};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub word: String,
    pub count: u64,
}

impl Record {
    pub fn new(word: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            count,
        }
    }

    /// What a mapper emits for every word occurrence.
    pub fn unit(word: impl Into<String>) -> Self {
        Self::new(word, 1)
    }

    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.word.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.count.to_string().as_bytes());
        buf.push(b'\n');
    }

    /// Parses one line, newline already stripped. Anything that is not
    /// `<word> <count>` with a non-empty whitespace-free word and a positive
    /// base-10 count yields `None`.
    pub fn decode(line: &[u8]) -> Option<Record> {
        let line = std::str::from_utf8(line).ok()?;
        let (word, count) = line.rsplit_once(' ')?;
        if word.is_empty() || word.contains(char::is_whitespace) {
            return None;
        }
        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let count: u64 = count.parse().ok()?;
        if count == 0 {
            return None;
        }
        Some(Record::new(word, count))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.word, self.count)
    }
}

/// Per-stream reassembly buffer.
///
/// Holds at most one trailing partial line; everything before the last
/// newline is handed out by [`LineBuffer::push`].
#[derive(Debug)]
pub struct LineBuffer {
    partial: Vec<u8>,
    max_partial: usize,
}

impl LineBuffer {
    pub fn new(max_partial: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_partial,
        }
    }

    /// Appends `bytes` and returns every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Lines> {
        self.partial.extend_from_slice(bytes);
        let lines = match memrchr(b'\n', &self.partial) {
            Some(end) => {
                let rest = self.partial.split_off(end + 1);
                Lines(std::mem::replace(&mut self.partial, rest))
            }
            None => Lines(Vec::new()),
        };
        if self.partial.len() > self.max_partial {
            return Err(PipelineError::FrameTooLong {
                len: self.partial.len(),
                max: self.max_partial,
            });
        }
        Ok(lines)
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Consumes the buffer at end-of-stream, returning the unterminated tail.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.partial.is_empty() {
            None
        } else {
            Some(self.partial)
        }
    }
}

/// A run of complete, newline-terminated lines.
#[derive(Debug, Default)]
pub struct Lines(Vec<u8>);

impl Lines {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the lines with their newlines removed.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let bytes = &self.0;
        let mut start = 0;
        memchr_iter(b'\n', bytes).map(move |end| {
            let line = &bytes[start..end];
            start = end + 1;
            line
        })
    }
}
