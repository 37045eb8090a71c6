// ============================================================
// Layer 1 — CLI Arguments
// ============================================================
// Every flag is optional. With none given the run uses the
// compiled-in defaults of PipelineConfig exactly.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for malformed values
//   - environment fallbacks (`env = ...`)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::Args;
use std::path::PathBuf;

use crate::application::config::PathOverrides;

#[derive(Args, Debug, Default)]
pub struct FineTuneArgs {
    /// JSON file overriding any subset of the pipeline configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory containing tokenizer.json or vocab.txt
    #[arg(long)]
    pub tokenizer_dir: Option<PathBuf>,

    /// Pretrained model: a local directory or an id under the cache dir
    #[arg(long)]
    pub model_id: Option<String>,

    /// Where model ids are resolved (org/name → <dir>/org--name)
    #[arg(long, env = "FINETUNE_MODEL_CACHE")]
    pub model_cache_dir: Option<PathBuf>,

    /// safetensors weights merged into the model after resizing
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Columnar JSON lyrics dataset
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Directory for the final model and tokenizer
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

/// The boundary between Layer 1 and Layer 2:
/// the application layer never sees clap types.
impl From<&FineTuneArgs> for PathOverrides {
    fn from(a: &FineTuneArgs) -> Self {
        PathOverrides {
            tokenizer_dir:    a.tokenizer_dir.clone(),
            model_id:         a.model_id.clone(),
            model_cache_dir:  a.model_cache_dir.clone(),
            checkpoint_path:  a.checkpoint.clone(),
            dataset_path:     a.dataset.clone(),
            final_output_dir: a.output_dir.clone(),
        }
    }
}
