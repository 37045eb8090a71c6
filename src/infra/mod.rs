// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches files outside the dataset itself:
//
//   checkpoint.rs      — safetensors weights I/O, periodic
//                        checkpoint directories with rotation,
//                        and the final save_pretrained artifact
//
//   model_store.rs     — resolves a model id to a local directory
//                        and builds the model from its config and
//                        weights
//
//   tokenizer_store.rs — loads tokenizer.json (or vocab.txt) with
//                        case and accents preserved; writes the
//                        tokenizer files next to the final model
//
//   metrics.rs         — train/eval CSV logs
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Weights files, training checkpoints, final artifact
pub mod checkpoint;

/// Pretrained model resolution and loading
pub mod model_store;

/// Tokenizer loading and saving
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
