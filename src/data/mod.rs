// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// JSON columns → RawRecords → TokenizedExamples → tensor batches
//
//   loader    — columnar JSON dataset → Vec<RawRecord>
//   preparer  — tokenize, truncate, pad, copy labels
//   dataset   — fixed-length in-memory Dataset
//   batcher   — Vec<TokenizedExample> → Seq2SeqBatch

pub mod batcher;
pub mod dataset;
pub mod loader;
pub mod preparer;
