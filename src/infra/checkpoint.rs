// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Reads and writes model weights as safetensors files.
//
// A weights file is a flat name → tensor map (see ml::state for
// the naming scheme). Reading accepts F32, F16, BF16 and F64
// tensors and widens/narrows everything to f32; writing always
// produces F32.
//
// Directory layout produced during training:
//
//   results/
//     checkpoint-500/
//       model.safetensors     ← all named parameters
//       config.json           ← Seq2SeqConfig (post-resize vocab)
//       trainer_state.json    ← step, epoch, last loss, lr
//     checkpoint-1000/
//     ...
//
// Only the newest `save_total_limit` checkpoint directories are kept.
//
// Final artifact directory (save_pretrained):
//
//   fine_tuned_model/
//     model.safetensors
//     config.json
//     (tokenizer files are added by the tokenizer store)
//
// Reference: Burn Book §5 (Records and Checkpointing)

use burn::prelude::*;
use safetensors::{tensor::Dtype, SafeTensors, View};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
};

use crate::domain::error::{FineTuneError, Result};
use crate::ml::model::{Seq2SeqConfig, Seq2SeqModel};
use crate::ml::state::{HostTensor, StateDict};

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE:  &str = "config.json";
pub const STATE_FILE:   &str = "trainer_state.json";
const CHECKPOINT_PREFIX: &str = "checkpoint-";

// ─── safetensors I/O ──────────────────────────────────────────────────────────
impl View for &HostTensor {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<[u8]> {
        Cow::Owned(self.values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn data_len(&self) -> usize {
        self.values.len() * std::mem::size_of::<f32>()
    }
}

fn decode_values(name: &str, dtype: Dtype, bytes: &[u8]) -> Result<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::F64 => bytes
            .chunks_exact(8)
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                f64::from_le_bytes(raw) as f32
            })
            .collect(),
        other => {
            return Err(FineTuneError::format(format!(
                "tensor '{name}' has unsupported dtype {other:?}"
            )))
        }
    };
    Ok(values)
}

/// Load every tensor in a safetensors file as f32.
pub fn read_state_dict(path: &Path) -> Result<StateDict> {
    if !path.is_file() {
        return Err(FineTuneError::not_found(path));
    }

    let bytes = fs::read(path)?;
    let file  = SafeTensors::deserialize(&bytes).map_err(|e| {
        FineTuneError::format(format!("'{}' is not a safetensors file: {e:?}", path.display()))
    })?;

    let mut state = StateDict::new();
    for (name, view) in file.tensors() {
        let values = decode_values(&name, view.dtype(), view.data())?;
        state.insert(name, HostTensor::new(view.shape().to_vec(), values)?);
    }

    tracing::info!("Read {} tensors from '{}'", state.len(), path.display());
    Ok(state)
}

pub fn write_state_dict(state: &StateDict, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    safetensors::serialize_to_file(state.iter(), &None, path).map_err(|e| {
        FineTuneError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("cannot write '{}': {e:?}", path.display()),
        ))
    })?;
    tracing::debug!("Wrote {} tensors to '{}'", state.len(), path.display());
    Ok(())
}

/// Write weights and architecture config so the model can be rebuilt later.
pub fn save_pretrained<B: Backend>(
    dir:    &Path,
    model:  &Seq2SeqModel<B>,
    config: &Seq2SeqConfig,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_state_dict(&model.state_dict()?, &dir.join(WEIGHTS_FILE))?;
    config.save(dir.join(CONFIG_FILE))?;
    Ok(())
}

// ─── Training checkpoints ─────────────────────────────────────────────────────
/// Progress recorded next to each periodic checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step:   usize,
    pub epoch:         f64,
    pub examples_seen: usize,
    pub loss:          f64,
    pub learning_rate: f64,
}

/// Writes periodic `checkpoint-<step>` directories and prunes old ones.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the output directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save<B: Backend>(
        &self,
        model:  &Seq2SeqModel<B>,
        config: &Seq2SeqConfig,
        state:  &TrainerState,
    ) -> Result<PathBuf> {
        let path = self.dir.join(format!("{CHECKPOINT_PREFIX}{}", state.global_step));
        save_pretrained(&path, model, config)?;
        fs::write(path.join(STATE_FILE), serde_json::to_string_pretty(state)?)?;

        tracing::info!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Existing checkpoints, oldest step first.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let step = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|s| s.parse::<usize>().ok());
            if let (Some(step), true) = (step, path.is_dir()) {
                found.push((step, path));
            }
        }
        found.sort_by_key(|(step, _)| *step);
        Ok(found)
    }

    /// Delete the oldest checkpoints so at most `limit` remain.
    /// A limit of 0 keeps everything.
    pub fn rotate(&self, limit: usize) -> Result<Vec<PathBuf>> {
        let existing = self.list()?;
        if limit == 0 || existing.len() <= limit {
            return Ok(Vec::new());
        }

        let excess = existing.len() - limit;
        let mut removed = Vec::with_capacity(excess);
        for (_, path) in existing.into_iter().take(excess) {
            fs::remove_dir_all(&path)?;
            tracing::debug!("Removed old checkpoint '{}'", path.display());
            removed.push(path);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::{tiny_config, TestBackend};

    struct RawView {
        dtype: Dtype,
        shape: Vec<usize>,
        bytes: Vec<u8>,
    }

    impl View for &RawView {
        fn dtype(&self) -> Dtype { self.dtype }
        fn shape(&self) -> &[usize] { &self.shape }
        fn data(&self) -> Cow<[u8]> { Cow::Borrowed(&self.bytes) }
        fn data_len(&self) -> usize { self.bytes.len() }
    }

    fn state(step: usize) -> TrainerState {
        TrainerState { global_step: step, epoch: 1.0, examples_seen: 4, loss: 2.5, learning_rate: 1e-5 }
    }

    #[test]
    fn test_write_then_read_state_dict() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");

        let mut sd = StateDict::new();
        sd.insert("a.weight".into(), HostTensor::new(vec![2, 2], vec![1.0, -2.0, 0.5, 4.0]).unwrap());
        sd.insert("b".into(), HostTensor::new(vec![3], vec![0.0, 1.0, 2.0]).unwrap());
        write_state_dict(&sd, &path).unwrap();

        assert_eq!(read_state_dict(&path).unwrap(), sd);
    }

    #[test]
    fn test_reads_half_precision() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("half.safetensors");

        let f16_bytes: Vec<u8> = [1.5f32, -0.25]
            .iter()
            .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
            .collect();
        let bf16_bytes: Vec<u8> = [2.0f32]
            .iter()
            .flat_map(|v| half::bf16::from_f32(*v).to_le_bytes())
            .collect();

        let views = vec![
            ("h".to_string(), RawView { dtype: Dtype::F16, shape: vec![2], bytes: f16_bytes }),
            ("bf".to_string(), RawView { dtype: Dtype::BF16, shape: vec![1], bytes: bf16_bytes }),
        ];
        safetensors::serialize_to_file(views.iter().map(|(n, v)| (n.clone(), v)), &None, &path).unwrap();

        let sd = read_state_dict(&path).unwrap();
        assert_eq!(sd["h"].values, vec![1.5, -0.25]);
        assert_eq!(sd["bf"].values, vec![2.0]);
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_state_dict(&dir.path().join("nope.safetensors")),
            Err(FineTuneError::ResourceNotFound { .. })
        ));

        let junk = dir.path().join("junk.safetensors");
        fs::write(&junk, b"not a tensor file").unwrap();
        assert!(matches!(read_state_dict(&junk), Err(FineTuneError::Format(_))));
    }

    #[test]
    fn test_checkpoints_rotate_oldest_first() {
        let dir    = tempfile::tempdir().unwrap();
        let mgr    = CheckpointManager::new(dir.path().join("results")).unwrap();
        let config = tiny_config(8);
        let model: Seq2SeqModel<TestBackend> = config.init(&Default::default());

        for step in [5, 10, 15] {
            mgr.save(&model, &config, &state(step)).unwrap();
        }
        let removed = mgr.rotate(2).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].ends_with("checkpoint-5"));

        let steps: Vec<usize> = mgr.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![10, 15]);
        let latest = mgr.dir().join("checkpoint-15");
        let saved: TrainerState =
            serde_json::from_str(&fs::read_to_string(latest.join(STATE_FILE)).unwrap()).unwrap();
        assert_eq!(saved, state(15));
        assert!(mgr.dir().join("checkpoint-10").join(WEIGHTS_FILE).is_file());
    }

    #[test]
    fn test_save_pretrained_reloads() {
        let dir    = tempfile::tempdir().unwrap();
        let config = tiny_config(8);
        let model: Seq2SeqModel<TestBackend> = config.init(&Default::default());
        save_pretrained(dir.path(), &model, &config).unwrap();

        let reloaded_cfg = Seq2SeqConfig::load(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(reloaded_cfg.vocab_size, 8);
        assert_eq!(reloaded_cfg.d_model, 16);

        let sd = read_state_dict(&dir.path().join(WEIGHTS_FILE)).unwrap();
        assert_eq!(sd, model.state_dict().unwrap());
    }
}
