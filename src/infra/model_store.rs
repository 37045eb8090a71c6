// ============================================================
// Layer 6 — Model Store
// ============================================================
// Resolves a pretrained model identifier to a local directory and
// builds the model from it.
//
//   "ai4bharat/IndicBART"
//       │  exists as a directory?  → use it directly
//       │  otherwise               → <cache_dir>/ai4bharat--IndicBART
//       ▼
//   config.json        (required)  → Seq2SeqConfig → fresh model
//   model.safetensors  (optional)  → merged by name, non-strict
//
// Nothing is downloaded; a missing directory or config.json is a
// ResourceNotFound error.

use burn::prelude::*;
use std::path::{Path, PathBuf};

use crate::domain::error::{FineTuneError, Result};
use crate::infra::checkpoint::{read_state_dict, CONFIG_FILE, WEIGHTS_FILE};
use crate::ml::model::{Seq2SeqConfig, Seq2SeqModel};

pub struct ModelStore {
    cache_dir: PathBuf,
}

impl ModelStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into() }
    }

    /// Local directory holding `model_id`'s files.
    pub fn resolve(&self, model_id: &str) -> Result<PathBuf> {
        let direct = Path::new(model_id);
        if direct.is_dir() {
            return Ok(direct.to_path_buf());
        }

        let cached = self.cache_dir.join(model_id.replace('/', "--"));
        if cached.is_dir() {
            return Ok(cached);
        }
        Err(FineTuneError::not_found(cached))
    }

    pub fn load_config(&self, dir: &Path) -> Result<Seq2SeqConfig> {
        let path = dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Err(FineTuneError::not_found(path));
        }
        let config = Seq2SeqConfig::load(&path)
            .map_err(|e| FineTuneError::format(format!("bad model config '{}': {e:?}", path.display())))?;

        if config.attention_heads == 0 || config.d_model % config.attention_heads != 0 {
            return Err(FineTuneError::format(format!(
                "bad model config '{}': d_model={} is not divisible by attention_heads={}",
                path.display(),
                config.d_model,
                config.attention_heads
            )));
        }
        Ok(config)
    }

    /// Build the model described by `model_id`, with pretrained weights if present.
    pub fn load<B: Backend>(
        &self,
        model_id: &str,
        device:   &B::Device,
    ) -> Result<(Seq2SeqModel<B>, Seq2SeqConfig)> {
        let dir    = self.resolve(model_id)?;
        let config = self.load_config(&dir)?;
        let model: Seq2SeqModel<B> = config.init(device);

        tracing::info!(
            "Built '{}' from '{}': vocab={}, d_model={}, layers={}+{}",
            model_id,
            dir.display(),
            config.vocab_size,
            config.d_model,
            config.encoder_layers,
            config.decoder_layers
        );

        let weights = dir.join(WEIGHTS_FILE);
        if !weights.is_file() {
            tracing::warn!("No '{}' in '{}'; starting from random weights", WEIGHTS_FILE, dir.display());
            return Ok((model, config));
        }

        let (model, _) = model.merge_state_dict(&read_state_dict(&weights)?)?;
        Ok((model, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::save_pretrained;
    use crate::ml::model::tests::{tiny_config, TestBackend};
    use std::fs;

    #[test]
    fn test_resolves_cache_layout() {
        let cache = tempfile::tempdir().unwrap();
        fs::create_dir_all(cache.path().join("org--name")).unwrap();

        let store = ModelStore::new(cache.path());
        assert_eq!(store.resolve("org/name").unwrap(), cache.path().join("org--name"));
        assert!(matches!(store.resolve("org/other"), Err(FineTuneError::ResourceNotFound { .. })));
    }

    #[test]
    fn test_direct_directory_wins() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ModelStore::new("/unused");
        let id    = dir.path().to_str().unwrap();
        assert_eq!(store.resolve(id).unwrap(), dir.path());
    }

    #[test]
    fn test_missing_config_is_not_found() {
        let cache = tempfile::tempdir().unwrap();
        fs::create_dir_all(cache.path().join("m")).unwrap();
        let err = ModelStore::new(cache.path())
            .load::<TestBackend>("m", &Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, FineTuneError::ResourceNotFound { .. }));
    }

    #[test]
    fn test_loads_pretrained_weights() {
        let cache  = tempfile::tempdir().unwrap();
        let config = tiny_config(11);
        let saved: Seq2SeqModel<TestBackend> = config.init(&Default::default());
        save_pretrained(&cache.path().join("m"), &saved, &config).unwrap();

        let (loaded, cfg) = ModelStore::new(cache.path())
            .load::<TestBackend>("m", &Default::default())
            .unwrap();
        assert_eq!(cfg.vocab_size, 11);
        assert_eq!(loaded.state_dict().unwrap(), saved.state_dict().unwrap());
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let dir = tempfile::tempdir().unwrap();
        tiny_config(9).with_attention_heads(3).save(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(matches!(
            ModelStore::new("/unused").load_config(dir.path()),
            Err(FineTuneError::Format(_))
        ));
    }

    #[test]
    fn test_config_only_gives_random_model() {
        let cache = tempfile::tempdir().unwrap();
        let dir   = cache.path().join("m");
        fs::create_dir_all(&dir).unwrap();
        tiny_config(9).save(dir.join(CONFIG_FILE)).unwrap();

        let (model, _) = ModelStore::new(cache.path())
            .load::<TestBackend>("m", &Default::default())
            .unwrap();
        assert_eq!(model.vocab_size(), 9);
    }
}
