// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for the batch job. Parses optional overrides with
// `clap`, builds the PipelineConfig and hands off to Layer 2.
//
//   lyrics-finetune                       ← reference run, all defaults
//   lyrics-finetune --config run.json     ← JSON overrides
//   lyrics-finetune --dataset other.json  ← single path override
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::FineTuneArgs;

use crate::application::{
    config::{PathOverrides, PipelineConfig},
    finetune_use_case::FineTuneUseCase,
};

#[derive(Parser, Debug)]
#[command(
    name = "lyrics-finetune",
    version = "0.1.0",
    about = "Fine-tune a pretrained seq2seq model on a Telugu lyrics dataset."
)]
pub struct Cli {
    #[command(flatten)]
    pub args: FineTuneArgs,
}

impl Cli {
    /// Resolve the configuration: defaults, then the JSON file, then flags.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let base = match &self.args.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Cannot read config '{}'", path.display()))?,
            None => PipelineConfig::default(),
        };
        Ok(PathOverrides::from(&self.args).apply(base))
    }

    pub fn run(self) -> Result<()> {
        let cfg = self.pipeline_config()?;
        tracing::info!(
            "Fine-tuning '{}' on '{}'",
            cfg.model_id,
            cfg.dataset_path.display()
        );

        let report = FineTuneUseCase::new(cfg).execute()?;

        let outcome = &report.outcome;
        println!(
            "Fine-tuning complete: {} examples, {} micro-batches, {} updates, train_loss={:.4}",
            report.examples,
            outcome.micro_steps,
            outcome.optimizer_steps,
            outcome.train_loss
        );
        println!(
            "Checkpoint merge: {} overwritten, {} missing, {} unexpected",
            report.merge.overwritten.len(),
            report.merge.missing_in_checkpoint.len(),
            report.merge.unexpected_in_checkpoint.len()
        );
        if let Some(last) = outcome.evaluations.last() {
            println!("Final eval: epoch {} eval_loss={:.4}", last.epoch, last.eval_loss);
        }
        println!("Model saved to '{}'.", report.artifact_dir.display());
        Ok(())
    }
}
