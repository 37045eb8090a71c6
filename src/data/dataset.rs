// ============================================================
// Layer 4 — Lyrics Dataset
// ============================================================
// Holds the tokenized examples in memory behind Burn's Dataset
// trait, so the DataLoader can shuffle and batch them.
//
// Every example has the same sequence length; a malformed one is
// a Format error at construction, before training starts.

use burn::data::dataset::Dataset;

use crate::domain::error::{FineTuneError, Result};
use crate::domain::record::TokenizedExample;

/// In-memory dataset of fixed-length examples.
/// Construction rejects any example whose sequences are not `seq_len` long,
/// so the batcher can stack rows without checking.
#[derive(Debug, Clone)]
pub struct LyricsDataset {
    examples: Vec<TokenizedExample>,
    seq_len:  usize,
}

impl LyricsDataset {
    pub fn new(examples: Vec<TokenizedExample>, seq_len: usize) -> Result<Self> {
        if let Some((i, bad)) = examples.iter().enumerate().find(|(_, e)| !e.has_len(seq_len)) {
            return Err(FineTuneError::format(format!(
                "example {i} is malformed: ids={}, mask={}, labels={} (expected {seq_len})",
                bad.input_ids.len(),
                bad.attention_mask.len(),
                bad.labels.len(),
            )));
        }
        Ok(Self { examples, seq_len })
    }

    pub fn seq_len(&self) -> usize { self.seq_len }

    pub fn examples(&self) -> &[TokenizedExample] { &self.examples }
}

impl Dataset<TokenizedExample> for LyricsDataset {
    fn get(&self, index: usize) -> Option<TokenizedExample> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_uniform_examples() {
        let ex = TokenizedExample::from_ids(&[1, 2], 4, 0);
        let ds = LyricsDataset::new(vec![ex.clone(), ex], 4).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).unwrap().input_ids, vec![1, 2, 0, 0]);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let good = TokenizedExample::from_ids(&[1, 2], 4, 0);
        let mut bad = good.clone();
        bad.labels.pop();
        let err = LyricsDataset::new(vec![good, bad], 4).err().unwrap();
        assert!(matches!(err, FineTuneError::Format(_)));
        assert!(err.to_string().contains("example 1"));
    }
}
