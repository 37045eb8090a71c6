// ============================================================
// Layer 5 — Encoder–Decoder Model
// ============================================================
// A BART-style sequence-to-sequence transformer:
//
//   input_ids ──► shared embedding + positions ──► N encoder layers ──┐
//                                                                     │ memory
//   decoder_input_ids ──► shared embedding + positions ──► N decoder layers
//                                                                     │
//                               hidden · sharedᵀ + final_logits_bias ◄┘
//
// Layers are post-norm (residual add, then LayerNorm). The output
// projection is tied to the shared token embedding, so resizing the
// vocabulary only touches `shared` and `final_logits_bias`.
//
// Reference: Lewis et al. (2020) BART
//            Vaswani et al. (2017) Attention Is All You Need

use burn::{
    module::Param,
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
};

use crate::data::batcher::Seq2SeqBatch;

/// Score assigned to masked attention positions before the softmax
const MASK_FILL: f64 = -1.0e4;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct Seq2SeqConfig {
    /// Rows of the shared token embedding
    pub vocab_size: usize,
    #[config(default = 256)]
    pub d_model: usize,
    #[config(default = 2)]
    pub encoder_layers: usize,
    #[config(default = 2)]
    pub decoder_layers: usize,
    #[config(default = 4)]
    pub attention_heads: usize,
    #[config(default = 1024)]
    pub ffn_dim: usize,
    /// Longest sequence either stack can embed
    #[config(default = 1024)]
    pub max_position_embeddings: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    /// Std of the normal init used for new weights and resized embedding rows
    #[config(default = 0.02)]
    pub init_std: f64,
    #[config(default = 0)]
    pub pad_token_id: usize,
    #[config(default = 2)]
    pub decoder_start_token_id: usize,
    #[config(default = 3)]
    pub eos_token_id: usize,
}

impl Seq2SeqConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Seq2SeqModel<B> {
        let shared = EmbeddingConfig::new(self.vocab_size, self.d_model)
            .with_initializer(self.initializer())
            .init(device);

        let encoder = Encoder {
            embed_positions:     self.position_embedding(device),
            layernorm_embedding: self.layer_norm(device),
            layers: (0..self.encoder_layers).map(|_| self.encoder_layer(device)).collect(),
            dropout: DropoutConfig::new(self.dropout).init(),
        };

        let decoder = Decoder {
            embed_positions:     self.position_embedding(device),
            layernorm_embedding: self.layer_norm(device),
            layers: (0..self.decoder_layers).map(|_| self.decoder_layer(device)).collect(),
            dropout: DropoutConfig::new(self.dropout).init(),
        };

        Seq2SeqModel {
            shared,
            encoder,
            decoder,
            final_logits_bias: Param::from_tensor(Tensor::zeros([self.vocab_size], device)),
            pad_token_id:           self.pad_token_id,
            decoder_start_token_id: self.decoder_start_token_id,
            eos_token_id:           self.eos_token_id,
            init_std:               self.init_std,
        }
    }

    fn initializer(&self) -> Initializer {
        Initializer::Normal { mean: 0.0, std: self.init_std }
    }

    fn linear<B: Backend>(&self, d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
        LinearConfig::new(d_in, d_out)
            .with_initializer(self.initializer())
            .init(device)
    }

    fn position_embedding<B: Backend>(&self, device: &B::Device) -> Embedding<B> {
        EmbeddingConfig::new(self.max_position_embeddings, self.d_model)
            .with_initializer(self.initializer())
            .init(device)
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.d_model).init(device)
    }

    fn attention<B: Backend>(&self, device: &B::Device) -> MultiHeadAttention<B> {
        MultiHeadAttentionConfig::new(self.d_model, self.attention_heads)
            .with_dropout(self.dropout)
            .with_min_float(MASK_FILL)
            .with_initializer(self.initializer())
            .init(device)
    }

    fn encoder_layer<B: Backend>(&self, device: &B::Device) -> EncoderLayer<B> {
        EncoderLayer {
            self_attn:            self.attention(device),
            self_attn_layer_norm: self.layer_norm(device),
            fc1:                  self.linear(self.d_model, self.ffn_dim, device),
            fc2:                  self.linear(self.ffn_dim, self.d_model, device),
            final_layer_norm:     self.layer_norm(device),
            dropout:              DropoutConfig::new(self.dropout).init(),
        }
    }

    fn decoder_layer<B: Backend>(&self, device: &B::Device) -> DecoderLayer<B> {
        DecoderLayer {
            self_attn:               self.attention(device),
            self_attn_layer_norm:    self.layer_norm(device),
            encoder_attn:            self.attention(device),
            encoder_attn_layer_norm: self.layer_norm(device),
            fc1:                     self.linear(self.d_model, self.ffn_dim, device),
            fc2:                     self.linear(self.ffn_dim, self.d_model, device),
            final_layer_norm:        self.layer_norm(device),
            dropout:                 DropoutConfig::new(self.dropout).init(),
        }
    }
}

// ─── Encoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub self_attn:            MultiHeadAttention<B>,
    pub self_attn_layer_norm: LayerNorm<B>,
    pub fc1:                  Linear<B>,
    pub fc2:                  Linear<B>,
    pub final_layer_norm:     LayerNorm<B>,
    pub dropout:              Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    /// pad_mask: [b, s], true where the source is padding
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn = self.self_attn.forward(MhaInput::self_attn(x.clone()).mask_pad(pad_mask)).context;
        let x    = self.self_attn_layer_norm.forward(x + self.dropout.forward(attn));

        let ffn = self.fc2.forward(self.dropout.forward(activation::gelu(self.fc1.forward(x.clone()))));
        self.final_layer_norm.forward(x + self.dropout.forward(ffn))
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub embed_positions:     Embedding<B>,
    pub layernorm_embedding: LayerNorm<B>,
    pub layers:              Vec<EncoderLayer<B>>,
    pub dropout:             Dropout,
}

// ─── Decoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct DecoderLayer<B: Backend> {
    pub self_attn:               MultiHeadAttention<B>,
    pub self_attn_layer_norm:    LayerNorm<B>,
    pub encoder_attn:            MultiHeadAttention<B>,
    pub encoder_attn_layer_norm: LayerNorm<B>,
    pub fc1:                     Linear<B>,
    pub fc2:                     Linear<B>,
    pub final_layer_norm:        LayerNorm<B>,
    pub dropout:                 Dropout,
}

impl<B: Backend> DecoderLayer<B> {
    pub fn forward(
        &self,
        x:           Tensor<B, 3>,
        memory:      Tensor<B, 3>,
        causal_mask: Tensor<B, 3, Bool>,
        memory_mask: Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let attn = self.self_attn.forward(MhaInput::self_attn(x.clone()).mask_attn(causal_mask)).context;
        let x    = self.self_attn_layer_norm.forward(x + self.dropout.forward(attn));

        let cross = self
            .encoder_attn
            .forward(MhaInput::new(x.clone(), memory.clone(), memory).mask_pad(memory_mask))
            .context;
        let x     = self.encoder_attn_layer_norm.forward(x + self.dropout.forward(cross));

        let ffn = self.fc2.forward(self.dropout.forward(activation::gelu(self.fc1.forward(x.clone()))));
        self.final_layer_norm.forward(x + self.dropout.forward(ffn))
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub embed_positions:     Embedding<B>,
    pub layernorm_embedding: LayerNorm<B>,
    pub layers:              Vec<DecoderLayer<B>>,
    pub dropout:             Dropout,
}

// ─── Full model ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Seq2SeqModel<B: Backend> {
    pub shared:                 Embedding<B>,
    pub encoder:                Encoder<B>,
    pub decoder:                Decoder<B>,
    pub final_logits_bias:      Param<Tensor<B, 1>>,
    pub pad_token_id:           usize,
    pub decoder_start_token_id: usize,
    pub eos_token_id:           usize,
    pub init_std:               f64,
}

/// Encoder output plus the padding mask the decoder's cross-attention needs.
pub struct EncoderOutput<B: Backend> {
    pub hidden:   Tensor<B, 3>,
    pub pad_mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> Seq2SeqModel<B> {
    /// Rows in the shared token embedding (= output vocabulary)
    pub fn vocab_size(&self) -> usize {
        self.shared.weight.val().dims()[0]
    }

    /// Token embeddings plus learned positions: [b, s] → [b, s, d]
    fn embed(&self, ids: Tensor<B, 2, Int>, positions: &Embedding<B>) -> Tensor<B, 3> {
        let [_, seq_len] = ids.dims();
        let device = ids.device();

        let tok = self.shared.forward(ids);
        let pos = positions.forward(
            Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device).unsqueeze::<2>(),
        );
        tok + pos
    }

    /// input_ids, attention_mask: [b, s] → hidden [b, s, d]
    pub fn encode(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> EncoderOutput<B> {
        let pad_mask = attention_mask.equal_elem(0);

        let enc = &self.encoder;
        let mut x = enc.layernorm_embedding.forward(self.embed(input_ids, &enc.embed_positions));
        x = enc.dropout.forward(x);
        for layer in &enc.layers {
            x = layer.forward(x, pad_mask.clone());
        }

        EncoderOutput { hidden: x, pad_mask }
    }

    /// decoder_input_ids: [b, t] → logits [b, t, vocab]
    pub fn decode(&self, decoder_input_ids: Tensor<B, 2, Int>, memory: &EncoderOutput<B>) -> Tensor<B, 3> {
        let [batch, t] = decoder_input_ids.dims();
        let causal = generate_autoregressive_mask::<B>(batch, t, &decoder_input_ids.device());

        let dec = &self.decoder;
        let mut x = dec.layernorm_embedding.forward(self.embed(decoder_input_ids, &dec.embed_positions));
        x = dec.dropout.forward(x);
        for layer in &dec.layers {
            x = layer.forward(x, memory.hidden.clone(), causal.clone(), memory.pad_mask.clone());
        }

        self.project(x)
    }

    /// Tied output projection: [b, t, d] → [b, t, vocab]
    fn project(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, t, d_model] = hidden.dims();
        let weight = self.shared.weight.val(); // [vocab, d]
        let vocab  = weight.dims()[0];

        let logits = hidden
            .reshape([batch * t, d_model])
            .matmul(weight.transpose())
            + self.final_logits_bias.val().unsqueeze::<2>();
        logits.reshape([batch, t, vocab])
    }

    pub fn forward(
        &self,
        input_ids:         Tensor<B, 2, Int>,
        attention_mask:    Tensor<B, 2, Int>,
        decoder_input_ids: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let memory = self.encode(input_ids, attention_mask);
        self.decode(decoder_input_ids, &memory)
    }

    /// Mean token-level cross-entropy of the decoder against the labels.
    pub fn forward_loss(&self, batch: Seq2SeqBatch<B>) -> Tensor<B, 1> {
        let logits = self.forward(batch.input_ids, batch.attention_mask, batch.decoder_input_ids);
        let [b, t, vocab] = logits.dims();

        let ce = CrossEntropyLossConfig::new().init(&logits.device());
        ce.forward(logits.reshape([b * t, vocab]), batch.labels.reshape([b * t]))
    }
}
