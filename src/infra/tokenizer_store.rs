// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the subword tokenizer from a local directory.
//
//   <dir>/tokenizer.json  → used as-is, except that any lowercasing
//                           or accent stripping in the normalizer is
//                           switched off (Telugu needs its marks)
//   <dir>/vocab.txt       → fallback: one token per line, id = line
//                           number, wrapped into a WordPiece tokenizer
//
// Both paths end in Tokenizer::from_str on a JSON document, so the
// fallback builds the same JSON layout the library itself writes.
//
// Padding and truncation stored in tokenizer.json are dropped: the
// preparer pads and truncates every sequence itself, and library-side
// batch padding would make the output depend on the group size.
//
// Only the JSON and WordPiece formats are read. A SentencePiece
// `spiece.model` must first be converted to tokenizer.json.
//
// The pad token is "<pad>" if the vocabulary has one, else "[PAD]".
//
// Reference: Sennrich et al. (2016) BPE paper
//            Kudo & Richardson (2018) SentencePiece

use serde_json::{json, Map, Value};
use std::{
    collections::HashSet,
    fs,
    io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokenizers::Tokenizer;

use crate::domain::error::{FineTuneError, Result};
use crate::domain::traits::TextEncoder;

pub const TOKENIZER_FILE:        &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const VOCAB_FILE:            &str = "vocab.txt";

const PAD_CANDIDATES: [&str; 2] = ["<pad>", "[PAD]"];
const UNK_TOKEN:      &str      = "[UNK]";
const SPECIAL_TOKENS: [&str; 5] = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"];

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self) -> Result<TextTokenizer> {
        if !self.dir.is_dir() {
            return Err(FineTuneError::not_found(&self.dir));
        }

        let tok_path   = self.dir.join(TOKENIZER_FILE);
        let vocab_path = self.dir.join(VOCAB_FILE);

        let json = if tok_path.is_file() {
            tracing::info!("Loading tokenizer from '{}'", tok_path.display());
            let mut doc: Value = serde_json::from_str(&fs::read_to_string(&tok_path)?)?;
            if let Some(normalizer) = doc.get_mut("normalizer") {
                preserve_case_and_accents(normalizer);
            }
            doc
        } else if vocab_path.is_file() {
            tracing::info!("No tokenizer.json; building WordPiece from '{}'", vocab_path.display());
            wordpiece_json(&fs::read_to_string(&vocab_path)?)?
        } else {
            return Err(FineTuneError::not_found(tok_path));
        };

        let inner = Tokenizer::from_str(&json.to_string())
            .map_err(|e| FineTuneError::format(format!("invalid tokenizer in '{}': {e}", self.dir.display())))?;

        let tokenizer = TextTokenizer::new(inner)?;
        tracing::info!(
            "Tokenizer ready: {} ids, pad '{}' = {}",
            tokenizer.id_space(),
            tokenizer.pad_token(),
            tokenizer.pad_id()
        );
        Ok(tokenizer)
    }
}

/// Remove Lowercase/StripAccents steps and turn off the equivalent
/// BertNormalizer flags, recursing into Sequence normalizers.
fn preserve_case_and_accents(normalizer: &mut Value) {
    let kind = normalizer.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some("Lowercase") | Some("StripAccents") => *normalizer = Value::Null,
        Some("BertNormalizer") => {
            normalizer["lowercase"]     = Value::Bool(false);
            normalizer["strip_accents"] = Value::Bool(false);
        }
        Some("Sequence") => {
            if let Some(steps) = normalizer.get_mut("normalizers").and_then(Value::as_array_mut) {
                steps.retain(|n| {
                    !matches!(n.get("type").and_then(Value::as_str), Some("Lowercase") | Some("StripAccents"))
                });
                steps.iter_mut().for_each(preserve_case_and_accents);
            }
        }
        _ => {}
    }
}

/// Build a WordPiece tokenizer document from a one-token-per-line vocabulary.
fn wordpiece_json(vocab_txt: &str) -> Result<Value> {
    let mut vocab = Map::new();
    let mut seen  = HashSet::new();

    for (id, line) in vocab_txt.lines().enumerate() {
        let token = line.trim_end_matches('\r');
        if token.trim().is_empty() {
            return Err(FineTuneError::format(format!("vocab.txt line {} is blank", id + 1)));
        }
        if !seen.insert(token.to_string()) {
            return Err(FineTuneError::format(format!("vocab.txt repeats token '{token}'")));
        }
        vocab.insert(token.to_string(), json!(id));
    }

    if vocab.is_empty() {
        return Err(FineTuneError::format("vocab.txt is empty"));
    }
    if !vocab.contains_key(UNK_TOKEN) {
        return Err(FineTuneError::format(format!("vocab.txt has no {UNK_TOKEN} token")));
    }

    let added_tokens: Vec<Value> = SPECIAL_TOKENS
        .iter()
        .filter_map(|t| vocab.get(*t).map(|id| (t, id)))
        .map(|(t, id)| json!({
            "id": id, "content": t, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        }))
        .collect();

    let post_processor = match (vocab.get("[CLS]"), vocab.get("[SEP]")) {
        (Some(cls), Some(sep)) => json!({
            "type": "BertProcessing",
            "sep": ["[SEP]", sep],
            "cls": ["[CLS]", cls]
        }),
        _ => Value::Null,
    };

    Ok(json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": false,
            "lowercase": false
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": post_processor,
        "decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
        "model": {
            "type": "WordPiece",
            "unk_token": UNK_TOKEN,
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": vocab
        }
    }))
}

// ─── TextTokenizer ────────────────────────────────────────────────────────────
/// A loaded tokenizer plus its resolved pad token.
pub struct TextTokenizer {
    inner:     Tokenizer,
    pad_token: String,
    pad_id:    u32,
}

impl TextTokenizer {
    pub fn new(mut inner: Tokenizer) -> Result<Self> {
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(|e| FineTuneError::format(format!("cannot disable truncation: {e}")))?;

        let (pad_token, pad_id) = PAD_CANDIDATES
            .iter()
            .find_map(|t| inner.token_to_id(t).map(|id| (t.to_string(), id)))
            .ok_or_else(|| {
                FineTuneError::format(format!("tokenizer has no pad token (tried {PAD_CANDIDATES:?})"))
            })?;
        Ok(Self { inner, pad_token, pad_id })
    }

    pub fn pad_token(&self) -> &str {
        &self.pad_token
    }

    /// One past the largest id the tokenizer can emit.
    pub fn id_space(&self) -> usize {
        self.inner
            .get_vocab(true)
            .values()
            .max()
            .map(|&id| id as usize + 1)
            .unwrap_or(0)
    }

    /// Write tokenizer.json and tokenizer_config.json into `dir`.
    pub fn save_pretrained(&self, dir: &Path, max_length: usize) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.inner
            .save(dir.join(TOKENIZER_FILE), true)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let config = json!({
            "model_max_length": max_length,
            "pad_token": self.pad_token,
            "do_lower_case": false,
            "keep_accents": true
        });
        fs::write(dir.join(TOKENIZER_CONFIG_FILE), serde_json::to_string_pretty(&config)?)?;

        tracing::info!("Saved tokenizer to '{}'", dir.display());
        Ok(())
    }
}

impl TextEncoder for TextTokenizer {
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<u32>>> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| FineTuneError::format(format!("tokenization failed: {e}")))?;
        Ok(encodings.iter().map(|e| e.get_ids().to_vec()).collect())
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }
}
