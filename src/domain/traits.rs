// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The data layer only talks to these traits:
//   - RecordSource → JsonColumnLoader reads a columnar JSON file
//   - TextEncoder  → TextTokenizer wraps a HuggingFace tokenizer
//
// Tests plug in small in-memory implementations of both.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::error::Result;
use crate::domain::record::RawRecord;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Anything that can produce the raw dataset records, in order.
pub trait RecordSource {
    fn load_records(&self) -> Result<Vec<RawRecord>>;
}

// ─── TextEncoder ──────────────────────────────────────────────────────────────
/// Text → token ids, with special tokens, no padding or truncation.
pub trait TextEncoder {
    /// Encode a group of texts; output order matches input order.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<u32>>>;

    /// Id used to fill sequences up to the fixed length
    fn pad_id(&self) -> u32;
}
