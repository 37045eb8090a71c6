// ============================================================
// Layer 4 — Dataset Preparer
// ============================================================
// Converts RawRecords into fixed-length TokenizedExamples.
//
// For every record:
//   1. encode the text (special tokens included, no padding)
//   2. keep the first `max_length` ids
//   3. pad with the tokenizer's pad id up to exactly `max_length`
//   4. attention mask = 1 for kept ids, 0 for padding
//   5. labels = copy of the padded ids
//
// Records are encoded in groups of `group_size`. Grouping only
// changes how many texts go to the encoder per call; the output
// is the same for any group size.

use crate::domain::error::{FineTuneError, Result};
use crate::domain::record::{RawRecord, TokenizedExample};
use crate::domain::traits::TextEncoder;

pub struct DatasetPreparer {
    max_length: usize,
    group_size: usize,
}

impl DatasetPreparer {
    pub fn new(max_length: usize, group_size: usize) -> Self {
        Self { max_length, group_size: group_size.max(1) }
    }

    /// Tokenize every record, preserving order.
    pub fn prepare<E: TextEncoder>(
        &self,
        records: &[RawRecord],
        encoder: &E,
    ) -> Result<Vec<TokenizedExample>> {
        let pad_id  = encoder.pad_id();
        let mut out = Vec::with_capacity(records.len());
        let mut truncated = 0usize;

        for group in records.chunks(self.group_size) {
            let texts: Vec<&str> = group.iter().map(|r| r.text.as_str()).collect();
            let encoded = encoder.encode_batch(&texts)?;

            if encoded.len() != group.len() {
                return Err(FineTuneError::format(format!(
                    "encoder returned {} sequences for {} texts",
                    encoded.len(),
                    group.len()
                )));
            }

            for ids in &encoded {
                if ids.len() > self.max_length {
                    truncated += 1;
                }
                out.push(TokenizedExample::from_ids(ids, self.max_length, pad_id));
            }
        }

        tracing::info!(
            "Tokenized {} records (max_length={}, {} truncated)",
            out.len(),
            self.max_length,
            truncated
        );
        Ok(out)
    }
}
