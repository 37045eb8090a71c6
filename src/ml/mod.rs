// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor code lives in this layer.
//
//   model.rs    — BART-style encoder–decoder:
//                 • shared token embedding + learned positions
//                 • post-norm self / cross attention layers
//                 • GELU feed-forward blocks
//                 • tied output projection + final_logits_bias
//
//   state.rs    — named parameter export/import, non-strict
//                 checkpoint merge, vocabulary resize
//
//   generate.rs — greedy autoregressive decoding for evaluation
//
//   trainer.rs  — AdamW loop with gradient accumulation, linear
//                 LR schedule, logging, checkpoints, evaluation
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Lewis et al. (2020) BART

/// Seq2seq transformer architecture
pub mod model;

/// Parameter naming, checkpoint merge, embedding resize
pub mod state;

/// Greedy decoding
pub mod generate;

/// Training loop with evaluation and checkpointing
pub mod trainer;
