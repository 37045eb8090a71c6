// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define what the
// pipeline works with:
//
//   record.rs — raw dataset rows and tokenized training examples
//   error.rs  — the failure taxonomy shared by every layer
//   traits.rs — record sources and text encoders
//
// No burn types and no file I/O live here.

pub mod error;

pub mod record;

pub mod traits;
