// ============================================================
// Layer 2 — Pipeline Configuration
// ============================================================
// Every path and hyperparameter of a fine-tuning run.
//
//   PipelineConfig     : where inputs come from, where output goes,
//                        and how the dataset is tokenized
//   TrainingArguments  : optimizer, batching, logging, checkpointing
//                        and evaluation options of the training loop
//
// Defaults reproduce the reference run exactly, so running the
// binary with no arguments needs no config file. A JSON file may
// override any subset of fields (missing fields keep defaults).
//
// Reference: Rust Book §5 (Structs), serde field attributes

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::error::{FineTuneError, Result};

// ─── Evaluation strategy ──────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStrategy {
    /// Never evaluate
    No,
    /// Evaluate after every full pass over the data
    Epoch,
}

// ─── Training arguments ───────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArguments {
    /// Intermediate checkpoints go here as checkpoint-<step>/
    pub output_dir:                  PathBuf,
    pub evaluation_strategy:         EvaluationStrategy,
    pub learning_rate:               f64,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size:  usize,
    /// AdamW decoupled weight decay
    pub weight_decay:                f64,
    /// Most recent checkpoints kept on disk (0 keeps all)
    pub save_total_limit:            usize,
    pub num_train_epochs:            usize,
    /// Evaluation decodes greedily and scores the generated tokens
    pub predict_with_generate:       bool,
    pub logging_dir:                 PathBuf,
    /// Log every N optimizer updates
    pub logging_steps:               usize,
    /// Micro-batches whose gradients are summed into one update
    pub gradient_accumulation_steps: usize,
    /// Checkpoint every N optimizer updates (0 disables)
    pub save_steps:                  usize,
    pub seed:                        u64,
    pub warmup_steps:                usize,
    /// Cap on generated tokens; None means the dataset max length
    pub generation_max_length:       Option<usize>,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            output_dir:                  PathBuf::from("./results"),
            evaluation_strategy:         EvaluationStrategy::Epoch,
            learning_rate:               2e-5,
            per_device_train_batch_size: 1,
            per_device_eval_batch_size:  1,
            weight_decay:                0.01,
            save_total_limit:            3,
            num_train_epochs:            1,
            predict_with_generate:       true,
            logging_dir:                 PathBuf::from("./logs"),
            logging_steps:               10,
            gradient_accumulation_steps: 4,
            save_steps:                  500,
            seed:                        42,
            warmup_steps:                0,
            generation_max_length:       None,
        }
    }
}

impl TrainingArguments {
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.per_device_train_batch_size == 0, "per_device_train_batch_size must be at least 1"),
            (self.per_device_eval_batch_size == 0,  "per_device_eval_batch_size must be at least 1"),
            (self.gradient_accumulation_steps == 0, "gradient_accumulation_steps must be at least 1"),
            (self.num_train_epochs == 0,            "num_train_epochs must be at least 1"),
            (self.learning_rate.is_nan() || self.learning_rate <= 0.0, "learning_rate must be positive"),
            (self.weight_decay < 0.0,               "weight_decay must not be negative"),
            (self.generation_max_length == Some(0), "generation_max_length must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(FineTuneError::Config((*msg).to_string())),
            None           => Ok(()),
        }
    }
}

// ─── Pipeline configuration ───────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory with tokenizer.json or vocab.txt
    pub tokenizer_dir:     PathBuf,
    /// Local directory, or id resolved under model_cache_dir
    pub model_id:          String,
    pub model_cache_dir:   PathBuf,
    /// safetensors weights merged into the resized model
    pub checkpoint_path:   PathBuf,
    pub dataset_path:      PathBuf,
    pub final_output_dir:  PathBuf,
    /// Dataset column holding the text
    pub text_field:        String,
    /// Embedding rows after resizing
    pub target_vocab_size: usize,
    /// Fixed sequence length of every example
    pub max_length:        usize,
    /// Records tokenized per encoder call
    pub map_batch_size:    usize,
    pub training:          TrainingArguments,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tokenizer_dir:     PathBuf::from("./albert-indic64k"),
            model_id:          "ai4bharat/IndicBART".to_string(),
            model_cache_dir:   PathBuf::from("./models"),
            checkpoint_path:   PathBuf::from("./separate_script_indicbart_model.safetensors"),
            dataset_path:      PathBuf::from("./telugu_lyrics_dataset.json"),
            final_output_dir:  PathBuf::from("./fine_tuned_model"),
            text_field:        "lyrics".to_string(),
            target_vocab_size: 64015,
            max_length:        128,
            map_batch_size:    8,
            training:          TrainingArguments::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with whatever fields the JSON file sets.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(FineTuneError::not_found(path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            return Err(FineTuneError::Config("max_length must be at least 1".into()));
        }
        if self.target_vocab_size == 0 {
            return Err(FineTuneError::Config("target_vocab_size must be at least 1".into()));
        }
        if self.text_field.is_empty() {
            return Err(FineTuneError::Config("text_field must not be empty".into()));
        }
        self.training.validate()
    }

    /// Longest sequence greedy decoding may produce during evaluation
    pub fn generation_max_length(&self) -> usize {
        self.training.generation_max_length.unwrap_or(self.max_length)
    }
}

// ─── Overrides ────────────────────────────────────────────────────────────────
/// Path-level overrides coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub tokenizer_dir:    Option<PathBuf>,
    pub model_id:         Option<String>,
    pub model_cache_dir:  Option<PathBuf>,
    pub checkpoint_path:  Option<PathBuf>,
    pub dataset_path:     Option<PathBuf>,
    pub final_output_dir: Option<PathBuf>,
}

impl PathOverrides {
    pub fn apply(self, mut cfg: PipelineConfig) -> PipelineConfig {
        if let Some(v) = self.tokenizer_dir    { cfg.tokenizer_dir    = v; }
        if let Some(v) = self.model_id         { cfg.model_id         = v; }
        if let Some(v) = self.model_cache_dir  { cfg.model_cache_dir  = v; }
        if let Some(v) = self.checkpoint_path  { cfg.checkpoint_path  = v; }
        if let Some(v) = self.dataset_path     { cfg.dataset_path     = v; }
        if let Some(v) = self.final_output_dir { cfg.final_output_dir = v; }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_length, 128);
        assert_eq!(cfg.target_vocab_size, 64015);
        assert_eq!(cfg.map_batch_size, 8);
        assert_eq!(cfg.text_field, "lyrics");
        assert_eq!(cfg.generation_max_length(), 128);

        let t = &cfg.training;
        assert_eq!(t.learning_rate, 2e-5);
        assert_eq!(t.gradient_accumulation_steps, 4);
        assert_eq!(t.per_device_train_batch_size, 1);
        assert_eq!(t.save_total_limit, 3);
        assert_eq!(t.evaluation_strategy, EvaluationStrategy::Epoch);
        assert!(t.predict_with_generate);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"max_length": 64, "training": {"num_train_epochs": 3, "evaluation_strategy": "no"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_length, 64);
        assert_eq!(cfg.training.num_train_epochs, 3);
        assert_eq!(cfg.training.evaluation_strategy, EvaluationStrategy::No);
        assert_eq!(cfg.training.learning_rate, 2e-5);
        assert_eq!(cfg.model_id, "ai4bharat/IndicBART");
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let mut cfg = PipelineConfig::default();
        cfg.training.gradient_accumulation_steps = 0;
        assert!(matches!(cfg.validate(), Err(FineTuneError::Config(_))));

        let mut cfg = PipelineConfig::default();
        cfg.max_length = 0;
        assert!(matches!(cfg.validate(), Err(FineTuneError::Config(_))));

        let mut cfg = PipelineConfig::default();
        cfg.training.per_device_train_batch_size = 0;
        assert!(matches!(cfg.validate(), Err(FineTuneError::Config(_))));
    }

    #[test]
    fn test_overrides_replace_only_given_paths() {
        let cfg = PathOverrides {
            dataset_path: Some("other.json".into()),
            ..Default::default()
        }
        .apply(PipelineConfig::default());
        assert_eq!(cfg.dataset_path, PathBuf::from("other.json"));
        assert_eq!(cfg.tokenizer_dir, PathBuf::from("./albert-indic64k"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let mut cfg = PipelineConfig::default();
        cfg.training.seed = 7;
        cfg.save(&path).unwrap();
        assert_eq!(PipelineConfig::from_file(&path).unwrap(), cfg);
    }
}
