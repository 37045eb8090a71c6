// ============================================================
// Layer 5 — Greedy Generation
// ============================================================
// Autoregressive decoding used when evaluating with generation.
//
//   1. encode the source once
//   2. start every row from [decoder_start]
//   3. repeat: run the decoder, take argmax of the last position,
//      append it; a row is finished once it emits EOS
//   4. stop when every row is finished or max_len tokens exist
//
// The returned sequences exclude the start token and include the
// EOS token when one was produced.

use burn::{prelude::*, tensor::TensorData};

use crate::ml::model::Seq2SeqModel;

pub fn greedy_generate<B: Backend>(
    model:          &Seq2SeqModel<B>,
    input_ids:      Tensor<B, 2, Int>,
    attention_mask: Tensor<B, 2, Int>,
    max_len:        usize,
) -> Vec<Vec<u32>> {
    let [batch, _] = input_ids.dims();
    let device = input_ids.device();
    let memory = model.encode(input_ids, attention_mask);

    let start = model.decoder_start_token_id as u32;
    let eos   = model.eos_token_id as u32;

    let mut prefixes: Vec<Vec<u32>> = vec![vec![start]; batch];
    let mut finished = vec![false; batch];

    // Position 0 is the start token, so at most max_len - 1 new tokens fit
    for _ in 1..max_len {
        if finished.iter().all(|&f| f) {
            break;
        }

        let t = prefixes[0].len();
        let flat: Vec<i64> = prefixes.iter().flatten().map(|&id| i64::from(id)).collect();
        let dec_in = Tensor::<B, 2, Int>::from_data(TensorData::new(flat, [batch, t]), &device);

        let logits = model.decode(dec_in, &memory); // [b, t, vocab]
        let [_, _, vocab] = logits.dims();
        let next: Vec<i64> = logits
            .slice([0..batch, t - 1..t, 0..vocab])
            .reshape([batch, vocab])
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap_or_default();

        for (row, prefix) in prefixes.iter_mut().enumerate() {
            // Finished rows keep the shared tensor rectangular with padding
            let token = if finished[row] {
                model.pad_token_id as u32
            } else {
                next.get(row).map(|&id| id as u32).unwrap_or(eos)
            };
            if token == eos {
                finished[row] = true;
            }
            prefix.push(token);
        }
    }

    prefixes
        .into_iter()
        .map(|seq| {
            let mut out: Vec<u32> = seq.into_iter().skip(1).collect();
            if let Some(end) = out.iter().position(|&id| id == eos) {
                out.truncate(end + 1);
            }
            out
        })
        .collect()
}

/// Fraction of real label tokens the generation reproduced position-wise.
/// Returns (matched, total) so callers can aggregate across batches.
pub fn token_matches(generated: &[u32], labels: &[u32], real_tokens: usize) -> (usize, usize) {
    let total   = real_tokens.min(labels.len());
    let matched = labels[..total]
        .iter()
        .zip(generated)
        .filter(|(label, gen)| label == gen)
        .count();
    (matched, total)
}
