// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Coordinates the other layers to run one fine-tuning job.
//
// Rules for this layer:
//   - No tensor code here (that's Layer 5)
//   - No file formats here (that's Layers 4 and 6)
//   - Only configuration and workflow ordering
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Paths and hyperparameters of a run
pub mod config;

// The end-to-end fine-tuning workflow
pub mod finetune_use_case;
