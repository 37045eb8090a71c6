// ============================================================
// Layer 5 — Named Parameter State
// ============================================================
// Bridges Burn modules and name-keyed tensor files.
//
//   Seq2SeqModel ──collect──► StateDict { "model.shared.weight" → HostTensor, ... }
//   StateDict    ──merge───►  Seq2SeqModel with matching entries overwritten
//
// Names follow the usual seq2seq checkpoint layout, e.g.
//
//   model.encoder.layers.0.self_attn.q_proj.weight
//   model.decoder.layers.1.encoder_attn_layer_norm.bias
//   final_logits_bias
//
// Linear weights are stored as [d_in, d_out], the layout Burn uses.
// Attention projections are stored under q_proj/k_proj/v_proj/out_proj
// and LayerNorm scale/shift under weight/bias.
//
// Merging is non-strict: entries missing from the checkpoint keep
// their current values, and checkpoint entries the model does not
// have are ignored. Both sets are reported. An entry whose shape
// differs from the model parameter aborts the merge.

use burn::{
    module::Param,
    nn::{attention::MultiHeadAttention, Embedding, LayerNorm, Linear},
    prelude::*,
    tensor::{Distribution, TensorData},
};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use crate::domain::error::{FineTuneError, Result};
use crate::ml::model::{Decoder, DecoderLayer, Encoder, EncoderLayer, Seq2SeqModel};

/// A tensor copied off the device: row-major f32 values plus shape.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl HostTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(FineTuneError::format(format!(
                "tensor of shape {shape:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }
}

/// Parameter name → tensor, ordered by name.
pub type StateDict = BTreeMap<String, HostTensor>;

/// What a non-strict merge did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeReport {
    /// Model parameters replaced by checkpoint values
    pub overwritten:              Vec<String>,
    /// Model parameters the checkpoint had no entry for
    pub missing_in_checkpoint:    Vec<String>,
    /// Checkpoint entries with no matching model parameter
    pub unexpected_in_checkpoint: Vec<String>,
}

// ─── Merger ───────────────────────────────────────────────────────────────────
/// Walks the model's parameters and swaps in checkpoint values by name.
pub struct WeightMerger<'a> {
    source:  &'a StateDict,
    visited: BTreeSet<String>,
    report:  MergeReport,
}

impl<'a> WeightMerger<'a> {
    pub fn new(source: &'a StateDict) -> Self {
        Self { source, visited: BTreeSet::new(), report: MergeReport::default() }
    }

    pub fn param<B: Backend, const D: usize>(
        &mut self,
        name:  String,
        param: Param<Tensor<B, D>>,
    ) -> Result<Param<Tensor<B, D>>> {
        self.visited.insert(name.clone());

        let Some(src) = self.source.get(&name) else {
            self.report.missing_in_checkpoint.push(name);
            return Ok(param);
        };

        let current  = param.val();
        let expected = current.dims().to_vec();
        if src.shape != expected {
            return Err(FineTuneError::ShapeMismatch {
                name,
                expected,
                found: src.shape.clone(),
            });
        }

        let device = current.device();
        let tensor = Tensor::<B, D>::from_data(
            TensorData::new(src.values.clone(), src.shape.clone()),
            &device,
        );
        self.report.overwritten.push(name);
        Ok(Param::from_tensor(tensor))
    }

    pub fn finish(mut self) -> MergeReport {
        self.report.unexpected_in_checkpoint = self
            .source
            .keys()
            .filter(|k| !self.visited.contains(*k))
            .cloned()
            .collect();
        self.report
    }
}

fn to_host<B: Backend, const D: usize>(param: &Param<Tensor<B, D>>) -> Result<HostTensor> {
    let tensor = param.val();
    let shape  = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| FineTuneError::format(format!("cannot read tensor data: {e:?}")))?;
    HostTensor::new(shape, values)
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{prefix}.{name}") }
}

// ─── ParamTree ────────────────────────────────────────────────────────────────
/// A module whose parameters can be listed and replaced by dotted name.
pub trait ParamTree: Sized {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()>;
    fn merge_params(self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self>;
}

impl<B: Backend> ParamTree for Linear<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        out.insert(join(prefix, "weight"), to_host(&self.weight)?);
        if let Some(bias) = &self.bias {
            out.insert(join(prefix, "bias"), to_host(bias)?);
        }
        Ok(())
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        self.weight = merger.param(join(prefix, "weight"), self.weight)?;
        self.bias = match self.bias {
            Some(bias) => Some(merger.param(join(prefix, "bias"), bias)?),
            None       => None,
        };
        Ok(self)
    }
}

impl<B: Backend> ParamTree for Embedding<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        out.insert(join(prefix, "weight"), to_host(&self.weight)?);
        Ok(())
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        self.weight = merger.param(join(prefix, "weight"), self.weight)?;
        Ok(self)
    }
}

impl<B: Backend> ParamTree for LayerNorm<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        out.insert(join(prefix, "weight"), to_host(&self.gamma)?);
        out.insert(join(prefix, "bias"), to_host(&self.beta)?);
        Ok(())
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        self.gamma = merger.param(join(prefix, "weight"), self.gamma)?;
        self.beta  = merger.param(join(prefix, "bias"), self.beta)?;
        Ok(self)
    }
}

impl<B: Backend> ParamTree for MultiHeadAttention<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        self.query.collect_params(&join(prefix, "q_proj"), out)?;
        self.key.collect_params(&join(prefix, "k_proj"), out)?;
        self.value.collect_params(&join(prefix, "v_proj"), out)?;
        self.output.collect_params(&join(prefix, "out_proj"), out)
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        self.query  = self.query.merge_params(&join(prefix, "q_proj"), merger)?;
        self.key    = self.key.merge_params(&join(prefix, "k_proj"), merger)?;
        self.value  = self.value.merge_params(&join(prefix, "v_proj"), merger)?;
        self.output = self.output.merge_params(&join(prefix, "out_proj"), merger)?;
        Ok(self)
    }
}

impl<B: Backend> ParamTree for EncoderLayer<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        self.self_attn.collect_params(&join(prefix, "self_attn"), out)?;
        self.self_attn_layer_norm.collect_params(&join(prefix, "self_attn_layer_norm"), out)?;
        self.fc1.collect_params(&join(prefix, "fc1"), out)?;
        self.fc2.collect_params(&join(prefix, "fc2"), out)?;
        self.final_layer_norm.collect_params(&join(prefix, "final_layer_norm"), out)
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        self.self_attn            = self.self_attn.merge_params(&join(prefix, "self_attn"), merger)?;
        self.self_attn_layer_norm = self.self_attn_layer_norm.merge_params(&join(prefix, "self_attn_layer_norm"), merger)?;
        self.fc1                  = self.fc1.merge_params(&join(prefix, "fc1"), merger)?;
        self.fc2                  = self.fc2.merge_params(&join(prefix, "fc2"), merger)?;
        self.final_layer_norm     = self.final_layer_norm.merge_params(&join(prefix, "final_layer_norm"), merger)?;
        Ok(self)
    }
}

impl<B: Backend> ParamTree for DecoderLayer<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        self.self_attn.collect_params(&join(prefix, "self_attn"), out)?;
        self.self_attn_layer_norm.collect_params(&join(prefix, "self_attn_layer_norm"), out)?;
        self.encoder_attn.collect_params(&join(prefix, "encoder_attn"), out)?;
        self.encoder_attn_layer_norm.collect_params(&join(prefix, "encoder_attn_layer_norm"), out)?;
        self.fc1.collect_params(&join(prefix, "fc1"), out)?;
        self.fc2.collect_params(&join(prefix, "fc2"), out)?;
        self.final_layer_norm.collect_params(&join(prefix, "final_layer_norm"), out)
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        self.self_attn               = self.self_attn.merge_params(&join(prefix, "self_attn"), merger)?;
        self.self_attn_layer_norm    = self.self_attn_layer_norm.merge_params(&join(prefix, "self_attn_layer_norm"), merger)?;
        self.encoder_attn            = self.encoder_attn.merge_params(&join(prefix, "encoder_attn"), merger)?;
        self.encoder_attn_layer_norm = self.encoder_attn_layer_norm.merge_params(&join(prefix, "encoder_attn_layer_norm"), merger)?;
        self.fc1                     = self.fc1.merge_params(&join(prefix, "fc1"), merger)?;
        self.fc2                     = self.fc2.merge_params(&join(prefix, "fc2"), merger)?;
        self.final_layer_norm        = self.final_layer_norm.merge_params(&join(prefix, "final_layer_norm"), merger)?;
        Ok(self)
    }
}

/// Encoder and decoder stacks share a layout apart from the layer type.
macro_rules! stack_param_tree {
    ($stack:ident) => {
        impl<B: Backend> ParamTree for $stack<B> {
            fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
                self.embed_positions.collect_params(&join(prefix, "embed_positions"), out)?;
                self.layernorm_embedding.collect_params(&join(prefix, "layernorm_embedding"), out)?;
                for (i, layer) in self.layers.iter().enumerate() {
                    layer.collect_params(&join(prefix, &format!("layers.{i}")), out)?;
                }
                Ok(())
            }

            fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
                self.embed_positions     = self.embed_positions.merge_params(&join(prefix, "embed_positions"), merger)?;
                self.layernorm_embedding = self.layernorm_embedding.merge_params(&join(prefix, "layernorm_embedding"), merger)?;
                self.layers = self
                    .layers
                    .into_iter()
                    .enumerate()
                    .map(|(i, layer)| layer.merge_params(&join(prefix, &format!("layers.{i}")), merger))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self)
            }
        }
    };
}

stack_param_tree!(Encoder);
stack_param_tree!(Decoder);

impl<B: Backend> ParamTree for Seq2SeqModel<B> {
    fn collect_params(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        let body = join(prefix, "model");
        self.shared.collect_params(&join(&body, "shared"), out)?;
        self.encoder.collect_params(&join(&body, "encoder"), out)?;
        self.decoder.collect_params(&join(&body, "decoder"), out)?;
        out.insert(join(prefix, "final_logits_bias"), to_host(&self.final_logits_bias)?);
        Ok(())
    }

    fn merge_params(mut self, prefix: &str, merger: &mut WeightMerger<'_>) -> Result<Self> {
        let body = join(prefix, "model");
        self.shared            = self.shared.merge_params(&join(&body, "shared"), merger)?;
        self.encoder           = self.encoder.merge_params(&join(&body, "encoder"), merger)?;
        self.decoder           = self.decoder.merge_params(&join(&body, "decoder"), merger)?;
        self.final_logits_bias = merger.param(join(prefix, "final_logits_bias"), self.final_logits_bias)?;
        Ok(self)
    }
}

// ─── Model-level operations ───────────────────────────────────────────────────
impl<B: Backend> Seq2SeqModel<B> {
    /// Every named parameter, copied to host memory.
    pub fn state_dict(&self) -> Result<StateDict> {
        let mut out = StateDict::new();
        self.collect_params("", &mut out)?;
        Ok(out)
    }

    /// Overwrite every parameter whose name appears in `state`.
    pub fn merge_state_dict(self, state: &StateDict) -> Result<(Self, MergeReport)> {
        let mut merger = WeightMerger::new(state);
        let model  = self.merge_params("", &mut merger)?;
        let report = merger.finish();

        tracing::info!(
            "Merged checkpoint: {} overwritten, {} missing, {} unexpected",
            report.overwritten.len(),
            report.missing_in_checkpoint.len(),
            report.unexpected_in_checkpoint.len()
        );
        if !report.missing_in_checkpoint.is_empty() {
            tracing::warn!("Parameters not in checkpoint: {:?}", report.missing_in_checkpoint);
        }
        if !report.unexpected_in_checkpoint.is_empty() {
            tracing::warn!("Checkpoint entries ignored: {:?}", report.unexpected_in_checkpoint);
        }
        Ok((model, report))
    }

    /// Grow or shrink the shared embedding (and the tied output bias) to
    /// `new_size` rows. Existing rows keep their values; new embedding rows
    /// are drawn from N(0, init_std²) and new bias entries are zero.
    pub fn resize_token_embeddings(mut self, new_size: usize) -> Self {
        let weight = self.shared.weight.val().detach();
        let bias   = self.final_logits_bias.val().detach();
        let [old_size, d_model] = weight.dims();
        let device = weight.device();

        let (weight, bias) = match new_size.cmp(&old_size) {
            Ordering::Equal => return self,
            Ordering::Less => (
                weight.slice([0..new_size, 0..d_model]),
                bias.slice([0..new_size]),
            ),
            Ordering::Greater => {
                let extra = new_size - old_size;
                let rows  = Tensor::random([extra, d_model], Distribution::Normal(0.0, self.init_std), &device);
                (
                    Tensor::cat(vec![weight, rows], 0),
                    Tensor::cat(vec![bias, Tensor::zeros([extra], &device)], 0),
                )
            }
        };

        // slice/cat results are graph nodes under autodiff; a parameter
        // must be a leaf, so rebuild both from their values
        let weight = Tensor::<B, 2>::from_data(weight.into_data(), &device);
        let bias   = Tensor::<B, 1>::from_data(bias.into_data(), &device);

        tracing::info!("Resized token embeddings: {} → {} rows", old_size, new_size);
        self.shared.weight     = Param::from_tensor(weight);
        self.final_logits_bias = Param::from_tensor(bias);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::{tiny_config, TestBackend};
    use burn::backend::{Autodiff, NdArray};

    type TrainBackend = Autodiff<NdArray>;

    fn tiny(vocab: usize) -> Seq2SeqModel<TestBackend> {
        tiny_config(vocab).init(&Default::default())
    }

    #[test]
    fn test_state_dict_names() {
        let state = tiny(12).state_dict().unwrap();
        assert!(state.contains_key("model.shared.weight"));
        assert!(state.contains_key("model.encoder.embed_positions.weight"));
        assert!(state.contains_key("model.encoder.layernorm_embedding.bias"));
        assert!(state.contains_key("model.encoder.layers.0.self_attn.q_proj.weight"));
        assert!(state.contains_key("model.decoder.layers.0.encoder_attn.out_proj.bias"));
        assert!(state.contains_key("model.decoder.layers.0.final_layer_norm.weight"));
        assert!(state.contains_key("final_logits_bias"));
        assert_eq!(state["model.shared.weight"].shape, vec![12, 16]);
        assert_eq!(state["model.encoder.layers.0.fc1.weight"].shape, vec![16, 32]);
    }

    #[test]
    fn test_merge_overwrites_and_reports() {
        let source = tiny(12);
        let mut state = StateDict::new();
        let wanted = source.state_dict().unwrap()["model.shared.weight"].clone();
        state.insert("model.shared.weight".into(), wanted.clone());
        state.insert("lm_head.weight".into(), wanted.clone());

        let (merged, report) = tiny(12).merge_state_dict(&state).unwrap();
        assert_eq!(report.overwritten, vec!["model.shared.weight".to_string()]);
        assert_eq!(report.unexpected_in_checkpoint, vec!["lm_head.weight".to_string()]);
        assert!(report.missing_in_checkpoint.contains(&"final_logits_bias".to_string()));

        let after = merged.state_dict().unwrap();
        assert_eq!(after["model.shared.weight"], wanted);
    }

    #[test]
    fn test_merge_leaves_model_only_params_unchanged() {
        let target = tiny(12);
        let before = target.state_dict().unwrap();

        let mut state = StateDict::new();
        let shared = tiny(12).state_dict().unwrap()["model.shared.weight"].clone();
        state.insert("model.shared.weight".into(), shared.clone());

        let (merged, _) = target.merge_state_dict(&state).unwrap();
        let after = merged.state_dict().unwrap();

        assert_eq!(after["model.shared.weight"], shared);
        for (name, tensor) in &before {
            if name != "model.shared.weight" {
                assert_eq!(&after[name], tensor, "{name} changed");
            }
        }
    }

    #[test]
    fn test_merge_rejects_shape_mismatch() {
        let mut state = StateDict::new();
        state.insert(
            "model.shared.weight".into(),
            HostTensor::new(vec![10, 16], vec![0.0; 160]).unwrap(),
        );
        let err = tiny(12).merge_state_dict(&state).unwrap_err();
        match err {
            FineTuneError::ShapeMismatch { name, expected, found } => {
                assert_eq!(name, "model.shared.weight");
                assert_eq!(expected, vec![12, 16]);
                assert_eq!(found, vec![10, 16]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_full_state_round_trips_between_models() {
        let a = tiny(9);
        let state = a.state_dict().unwrap();
        let (b, report) = tiny(9).merge_state_dict(&state).unwrap();
        assert!(report.missing_in_checkpoint.is_empty());
        assert!(report.unexpected_in_checkpoint.is_empty());
        assert_eq!(b.state_dict().unwrap(), state);
    }

    #[test]
    fn test_resize_grows_and_keeps_rows() {
        let model  = tiny(10);
        let before = model.state_dict().unwrap();
        let model  = model.resize_token_embeddings(14);
        let after  = model.state_dict().unwrap();

        assert_eq!(model.vocab_size(), 14);
        assert_eq!(after["model.shared.weight"].shape, vec![14, 16]);
        assert_eq!(
            after["model.shared.weight"].values[..160],
            before["model.shared.weight"].values[..]
        );
        assert_eq!(after["final_logits_bias"].shape, vec![14]);
        assert!(after["final_logits_bias"].values[10..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_resize_shrinks() {
        let model = tiny(10).resize_token_embeddings(6);
        assert_eq!(model.vocab_size(), 6);
        assert_eq!(model.state_dict().unwrap()["final_logits_bias"].shape, vec![6]);
    }

    #[test]
    fn test_resize_on_autodiff_backend_stays_trainable() {
        use crate::data::batcher::Seq2SeqBatcher;
        use crate::domain::record::TokenizedExample;
        use burn::data::dataloader::batcher::Batcher;

        let device = Default::default();
        let model: Seq2SeqModel<TrainBackend> = tiny_config(10).init(&device);
        let before = model.state_dict().unwrap();

        let model = model.resize_token_embeddings(14);
        assert_eq!(model.vocab_size(), 14);
        let after = model.state_dict().unwrap();
        assert_eq!(after["model.shared.weight"].values[..160], before["model.shared.weight"].values[..]);

        let shrunk = tiny_config(10).init::<TrainBackend>(&device).resize_token_embeddings(6);
        assert_eq!(shrunk.vocab_size(), 6);

        // the resized parameters must receive gradients
        let batch = Seq2SeqBatcher::<TrainBackend>::new(device, 2)
            .batch(vec![TokenizedExample::from_ids(&[2, 12, 13, 3], 6, 0)]);
        let grads = model.forward_loss(batch).backward();
        assert!(model.shared.weight.grad(&grads).is_some());
        assert!(model.final_logits_bias.grad(&grads).is_some());
    }

    #[test]
    fn test_merge_on_autodiff_backend() {
        let device = Default::default();
        let source = tiny_config(12).init::<TrainBackend>(&device).state_dict().unwrap();
        let (merged, report) = tiny_config(12)
            .init::<TrainBackend>(&device)
            .merge_state_dict(&source)
            .unwrap();
        assert!(report.missing_in_checkpoint.is_empty());
        assert_eq!(merged.state_dict().unwrap(), source);
    }

    #[test]
    fn test_host_tensor_checks_length() {
        assert!(HostTensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(matches!(
            HostTensor::new(vec![2, 3], vec![0.0; 5]),
            Err(FineTuneError::Format(_))
        ));
    }
}
