// ============================================================
// Layer 3 — Dataset Record Types
// ============================================================
// RawRecord        — one row of the columnar JSON document
// TokenizedExample — the fixed-length training form of a row
//
// Both are plain data. A RawRecord keeps every column of its row
// so extra fields survive loading, even though only the text
// field is tokenized.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One input example: the text to learn from plus any other
/// columns present in the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub text:   String,
    pub fields: BTreeMap<String, Value>,
}

impl RawRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), fields: BTreeMap::new() }
    }
}

/// A padded/truncated id sequence with its mask and labels.
/// `labels` is always a copy of `input_ids` (autoencoding objective).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels:         Vec<u32>,
}

impl TokenizedExample {
    /// Build an example from raw ids: truncate to `max_len`, pad with `pad_id`.
    pub fn from_ids(ids: &[u32], max_len: usize, pad_id: u32) -> Self {
        let kept = ids.len().min(max_len);

        let mut input_ids = ids[..kept].to_vec();
        input_ids.resize(max_len, pad_id);

        let mut attention_mask = vec![1u32; kept];
        attention_mask.resize(max_len, 0);

        let labels = input_ids.clone();
        Self { input_ids, attention_mask, labels }
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.len()
    }

    /// Number of non-padding positions
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }

    /// True when all three sequences have exactly `len` entries
    pub fn has_len(&self, len: usize) -> bool {
        self.input_ids.len() == len
            && self.attention_mask.len() == len
            && self.labels.len() == len
    }
}
