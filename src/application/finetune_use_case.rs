// ============================================================
// Layer 2 — FineTuneUseCase
// ============================================================
// Orchestrates the full fine-tuning pipeline in order:
//
//   Step 1: Load tokenizer (case/accents kept)    (Layer 6 - infra)
//   Step 2: Build pretrained model                (Layer 6 - infra)
//   Step 3: Resize token embeddings               (Layer 5 - ml)
//   Step 4: Merge checkpoint weights by name      (Layer 5/6)
//   Step 5: Load + tokenize the lyrics dataset    (Layer 4 - data)
//   Step 6: Prepare output/log dirs, save config  (Layer 6 - infra)
//   Step 7: Run the training loop                 (Layer 5 - ml)
//   Step 8: Save model + tokenizer artifact       (Layer 6 - infra)
//
// Any failure aborts the run; files already written stay on disk.
//
// Reference: Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    prelude::*,
};
use std::path::PathBuf;

use crate::application::config::PipelineConfig;
use crate::data::{dataset::LyricsDataset, loader::JsonColumnLoader, preparer::DatasetPreparer};
use crate::domain::error::FineTuneError;
use crate::domain::traits::RecordSource;
use crate::infra::{
    checkpoint::{read_state_dict, save_pretrained, CheckpointManager},
    metrics::MetricsLogger,
    model_store::ModelStore,
    tokenizer_store::{TextTokenizer, TokenizerStore},
};
use crate::ml::{
    model::Seq2SeqConfig,
    state::MergeReport,
    trainer::{TrainOutcome, Trainer},
};

type TrainBackend = Autodiff<NdArray>;

/// Written next to the intermediate checkpoints
pub const PIPELINE_CONFIG_FILE: &str = "pipeline_config.json";

#[derive(Debug)]
pub struct FineTuneReport {
    pub examples:     usize,
    pub merge:        MergeReport,
    pub outcome:      TrainOutcome,
    pub artifact_dir: PathBuf,
}

pub struct FineTuneUseCase {
    config: PipelineConfig,
}

impl FineTuneUseCase {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<FineTuneReport> {
        let cfg = &self.config;
        cfg.validate().context("Invalid pipeline configuration")?;

        // ── Step 1: Tokenizer ─────────────────────────────────────────────────
        let tokenizer = TokenizerStore::new(&cfg.tokenizer_dir)
            .load()
            .with_context(|| format!("Cannot load tokenizer from '{}'", cfg.tokenizer_dir.display()))?;

        // ── Step 2: Pretrained model ──────────────────────────────────────────
        let device = NdArrayDevice::default();
        TrainBackend::seed(cfg.training.seed);

        let (model, mut model_cfg) = ModelStore::new(&cfg.model_cache_dir)
            .load::<TrainBackend>(&cfg.model_id, &device)
            .with_context(|| format!("Cannot load model '{}'", cfg.model_id))?;

        // ── Step 3: Resize to the tokenizer's vocabulary ──────────────────────
        let model = model.resize_token_embeddings(cfg.target_vocab_size);
        model_cfg.vocab_size = model.vocab_size();
        check_compatibility(cfg, &model_cfg, &tokenizer)?;

        // ── Step 4: Merge checkpoint weights ──────────────────────────────────
        let weights = read_state_dict(&cfg.checkpoint_path)
            .with_context(|| format!("Cannot read checkpoint '{}'", cfg.checkpoint_path.display()))?;
        let (model, merge) = model
            .merge_state_dict(&weights)
            .with_context(|| format!("Cannot merge checkpoint '{}'", cfg.checkpoint_path.display()))?;

        // ── Step 5: Dataset ───────────────────────────────────────────────────
        let records = JsonColumnLoader::new(&cfg.dataset_path, &cfg.text_field)
            .load_records()
            .with_context(|| format!("Cannot load dataset '{}'", cfg.dataset_path.display()))?;
        if records.is_empty() {
            return Err(FineTuneError::format("dataset contains no records"))
                .with_context(|| format!("Cannot load dataset '{}'", cfg.dataset_path.display()));
        }

        let examples = DatasetPreparer::new(cfg.max_length, cfg.map_batch_size)
            .prepare(&records, &tokenizer)
            .context("Tokenization failed")?;
        let n_examples = examples.len();
        let dataset = LyricsDataset::new(examples, cfg.max_length)?;
        tracing::warn!("Evaluation uses the training examples; eval metrics are not held-out scores");

        // ── Step 6: Output locations ──────────────────────────────────────────
        let checkpoints = CheckpointManager::new(&cfg.training.output_dir)
            .with_context(|| format!("Cannot create '{}'", cfg.training.output_dir.display()))?;
        let metrics = MetricsLogger::new(&cfg.training.logging_dir)
            .with_context(|| format!("Cannot create '{}'", cfg.training.logging_dir.display()))?;
        cfg.save(&checkpoints.dir().join(PIPELINE_CONFIG_FILE))?;
        tracing::info!(
            "Checkpoints go to '{}'; metrics to '{}' and '{}'",
            checkpoints.dir().display(),
            metrics.train_csv().display(),
            metrics.eval_csv().display()
        );

        // ── Step 7: Train ─────────────────────────────────────────────────────
        let trainer = Trainer::new(&cfg.training, &model_cfg, &checkpoints, &metrics, cfg.generation_max_length());
        let (model, outcome) = trainer
            .train(model, dataset.clone(), dataset, &device)
            .context("Training failed")?;

        // ── Step 8: Final artifact ────────────────────────────────────────────
        save_pretrained(&cfg.final_output_dir, &model, &model_cfg)
            .with_context(|| format!("Cannot save model to '{}'", cfg.final_output_dir.display()))?;
        tokenizer
            .save_pretrained(&cfg.final_output_dir, cfg.max_length)
            .with_context(|| format!("Cannot save tokenizer to '{}'", cfg.final_output_dir.display()))?;
        tracing::info!("Fine-tuned model saved to '{}'", cfg.final_output_dir.display());

        Ok(FineTuneReport {
            examples: n_examples,
            merge,
            outcome,
            artifact_dir: cfg.final_output_dir.clone(),
        })
    }
}

/// Checks that the tokenizer, the resized model and the sequence
/// lengths fit together before any weights are touched.
fn check_compatibility(
    cfg:       &PipelineConfig,
    model_cfg: &Seq2SeqConfig,
    tokenizer: &TextTokenizer,
) -> std::result::Result<(), FineTuneError> {
    let ids = tokenizer.id_space();
    if ids > model_cfg.vocab_size {
        return Err(FineTuneError::Config(format!(
            "tokenizer emits ids up to {} but the embedding has {} rows",
            ids - 1,
            model_cfg.vocab_size
        )));
    }
    if ids < model_cfg.vocab_size {
        tracing::warn!(
            "Embedding has {} rows but the tokenizer only uses {} ids",
            model_cfg.vocab_size,
            ids
        );
    }

    let longest = cfg.max_length.max(cfg.generation_max_length());
    if longest > model_cfg.max_position_embeddings {
        return Err(FineTuneError::Config(format!(
            "sequences of {longest} tokens exceed max_position_embeddings={}",
            model_cfg.max_position_embeddings
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::{write_state_dict, CONFIG_FILE, WEIGHTS_FILE};
    use crate::infra::tokenizer_store::tests::write_word_level_tokenizer;
    use crate::infra::tokenizer_store::{TOKENIZER_CONFIG_FILE, TOKENIZER_FILE};
    use crate::ml::model::tests::{tiny_config, TestBackend};
    use crate::ml::model::Seq2SeqModel;
    use serde_json::json;
    use std::{fs, path::Path};

    const WORDS: [&str; 7] = ["hello", "world", "a", "very", "long", "repeated", "phrase"];
    /// 4 specials + 7 words
    const TOKENIZER_IDS: usize = 11;
    const TARGET_VOCAB:  usize = 16;

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn config(&self) -> PipelineConfig {
            let mut cfg = PipelineConfig {
                tokenizer_dir:     self.path("tokenizer"),
                model_id:          "tiny/model".into(),
                model_cache_dir:   self.path("models"),
                checkpoint_path:   self.path("separate.safetensors"),
                dataset_path:      self.path("lyrics.json"),
                final_output_dir:  self.path("fine_tuned_model"),
                target_vocab_size: TARGET_VOCAB,
                ..PipelineConfig::default()
            };
            cfg.training.output_dir            = self.path("results");
            cfg.training.logging_dir           = self.path("logs");
            cfg.training.generation_max_length = Some(4);
            cfg
        }
    }

    fn write_checkpoint(path: &Path, vocab: usize) {
        let model: Seq2SeqModel<TestBackend> = tiny_config(vocab).init(&Default::default());
        write_state_dict(&model.state_dict().unwrap(), path).unwrap();
    }

    /// Tokenizer, pretrained model dir, checkpoint and a two-song dataset.
    fn workspace() -> Workspace {
        let ws = Workspace { dir: tempfile::tempdir().unwrap() };
        write_word_level_tokenizer(&ws.path("tokenizer"), &WORDS);

        let model_dir = ws.path("models").join("tiny--model");
        fs::create_dir_all(&model_dir).unwrap();
        tiny_config(TOKENIZER_IDS).save(model_dir.join(CONFIG_FILE)).unwrap();

        write_checkpoint(&ws.path("separate.safetensors"), TARGET_VOCAB);

        let long = "a very long repeated phrase ".repeat(50);
        let doc  = json!({ "lyrics": ["hello world", long.trim_end()], "title": ["one", "two"] });
        fs::write(ws.path("lyrics.json"), doc.to_string()).unwrap();
        ws
    }

    fn category(err: &anyhow::Error) -> Option<&FineTuneError> {
        err.downcast_ref::<FineTuneError>()
    }

    #[test]
    fn test_end_to_end_two_songs() {
        let ws     = workspace();
        let report = FineTuneUseCase::new(ws.config()).execute().unwrap();

        assert_eq!(report.examples, 2);
        assert_eq!(report.outcome.micro_steps, 2);
        assert_eq!(report.outcome.optimizer_steps, 1);
        assert!(report.merge.missing_in_checkpoint.is_empty());
        assert!(report.merge.unexpected_in_checkpoint.is_empty());
        assert_eq!(report.outcome.evaluations.len(), 1);

        let out = ws.path("fine_tuned_model");
        for file in [WEIGHTS_FILE, CONFIG_FILE, TOKENIZER_FILE, TOKENIZER_CONFIG_FILE] {
            assert!(out.join(file).is_file(), "missing {file}");
        }
        let saved = Seq2SeqConfig::load(out.join(CONFIG_FILE)).unwrap();
        assert_eq!(saved.vocab_size, TARGET_VOCAB);

        assert!(ws.path("results").join(PIPELINE_CONFIG_FILE).is_file());
        assert!(ws.path("logs").join("eval_log.csv").is_file());
    }

    #[test]
    fn test_missing_text_field_fails_before_training() {
        let ws = workspace();
        fs::write(ws.path("lyrics.json"), r#"{"text": ["hello world"]}"#).unwrap();

        let err = FineTuneUseCase::new(ws.config()).execute().unwrap_err();
        assert!(matches!(category(&err), Some(FineTuneError::Format(_))));
        assert!(!ws.path("fine_tuned_model").exists());
    }

    #[test]
    fn test_pre_resize_checkpoint_is_shape_mismatch() {
        let ws = workspace();
        write_checkpoint(&ws.path("separate.safetensors"), TOKENIZER_IDS);

        let err = FineTuneUseCase::new(ws.config()).execute().unwrap_err();
        assert!(matches!(category(&err), Some(FineTuneError::ShapeMismatch { .. })));
        assert!(!ws.path("fine_tuned_model").exists());
    }

    #[test]
    fn test_missing_inputs_are_not_found() {
        let ws = workspace();
        let mut cfg = ws.config();
        cfg.tokenizer_dir = ws.path("no-tokenizer");
        let err = FineTuneUseCase::new(cfg).execute().unwrap_err();
        assert!(matches!(category(&err), Some(FineTuneError::ResourceNotFound { .. })));

        let mut cfg = ws.config();
        cfg.checkpoint_path = ws.path("missing.safetensors");
        let err = FineTuneUseCase::new(cfg).execute().unwrap_err();
        assert!(matches!(category(&err), Some(FineTuneError::ResourceNotFound { .. })));
    }

    #[test]
    fn test_empty_dataset_is_format_error() {
        let ws = workspace();
        fs::write(ws.path("lyrics.json"), r#"{"lyrics": []}"#).unwrap();
        let err = FineTuneUseCase::new(ws.config()).execute().unwrap_err();
        assert!(matches!(category(&err), Some(FineTuneError::Format(_))));
    }

    #[test]
    fn test_vocab_smaller_than_tokenizer_is_config_error() {
        let ws = workspace();
        let mut cfg = ws.config();
        cfg.target_vocab_size = 8;
        let err = FineTuneUseCase::new(cfg).execute().unwrap_err();
        assert!(matches!(category(&err), Some(FineTuneError::Config(_))));
    }
}
