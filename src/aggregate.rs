use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::record::Record;

/// A reducer's running word -> count table.
#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    counts: HashMap<String, u64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `record` to its word's count. A sum past `u64::MAX` fails and
    /// leaves that word's count unchanged.
    pub fn add(&mut self, record: Record) -> Result<()> {
        self.add_count(record.word, record.count)
    }

    pub fn extend<I: IntoIterator<Item = Record>>(&mut self, records: I) -> Result<()> {
        for record in records {
            self.add(record)?;
        }
        Ok(())
    }

    /// Folds another partial table into this one.
    pub fn merge(&mut self, other: Aggregator) -> Result<()> {
        for (word, count) in other.counts {
            self.add_count(word, count)?;
        }
        Ok(())
    }

    fn add_count(&mut self, word: String, count: u64) -> Result<()> {
        match self.counts.get_mut(&word) {
            Some(total) => {
                *total = total
                    .checked_add(count)
                    .ok_or(PipelineError::CountOverflow { word })?;
            }
            None => {
                self.counts.insert(word, count);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0, |sum, c| sum.saturating_add(*c))
    }

    /// Finalizes the table into records ordered by the bytes of their word.
    pub fn into_sorted(self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .counts
            .into_iter()
            .map(|(word, count)| Record::new(word, count))
            .collect();
        // stable merge sort, O(n log n) worst case
        records.sort_by(|a, b| a.word.as_bytes().cmp(b.word.as_bytes()));
        records
    }
}
