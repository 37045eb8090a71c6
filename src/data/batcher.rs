// ============================================================
// Layer 4 — Seq2Seq Batcher
// ============================================================
// Implements Burn's Batcher trait: Vec<TokenizedExample> → tensors.
//
//   Input:  N examples, each with sequences of length S
//   Output: Seq2SeqBatch with four Int tensors of shape [N, S]
//
// The decoder input is the label sequence shifted one position to
// the right with the decoder start token in front:
//
//   labels            = [ l0, l1, l2, ..., l(S-1) ]
//   decoder_input_ids = [ start, l0, l1, ..., l(S-2) ]
//
// so at position t the decoder sees labels < t and predicts l_t.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::record::TokenizedExample;

#[derive(Debug, Clone)]
pub struct Seq2SeqBatch<B: Backend> {
    /// Encoder ids — [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding — [batch_size, seq_len]
    pub attention_mask: Tensor<B, 2, Int>,

    /// Labels shifted right — [batch_size, seq_len]
    pub decoder_input_ids: Tensor<B, 2, Int>,

    /// Targets for the cross-entropy loss — [batch_size, seq_len]
    pub labels: Tensor<B, 2, Int>,
}

#[derive(Clone, Debug)]
pub struct Seq2SeqBatcher<B: Backend> {
    device:           B::Device,
    decoder_start_id: u32,
}

impl<B: Backend> Seq2SeqBatcher<B> {
    pub fn new(device: B::Device, decoder_start_id: u32) -> Self {
        Self { device, decoder_start_id }
    }

    fn int_tensor(&self, flat: Vec<i64>, batch_size: usize, seq_len: usize) -> Tensor<B, 2, Int> {
        Tensor::<B, 2, Int>::from_data(TensorData::new(flat, [batch_size, seq_len]), &self.device)
    }
}

/// Labels shifted one step right, starting with `start_id`.
pub fn shift_right(labels: &[u32], start_id: u32) -> Vec<u32> {
    let mut shifted = Vec::with_capacity(labels.len());
    if labels.is_empty() {
        return shifted;
    }
    shifted.push(start_id);
    shifted.extend_from_slice(&labels[..labels.len() - 1]);
    shifted
}

impl<B: Backend> Batcher<TokenizedExample, Seq2SeqBatch<B>> for Seq2SeqBatcher<B> {
    fn batch(&self, items: Vec<TokenizedExample>) -> Seq2SeqBatch<B> {
        let batch_size = items.len();
        // LyricsDataset guarantees every example has the same length
        let seq_len    = items.first().map(|e| e.seq_len()).unwrap_or(0);

        let input_ids: Vec<i64> = items
            .iter()
            .flat_map(|e| e.input_ids.iter().map(|&x| i64::from(x)))
            .collect();

        let mask: Vec<i64> = items
            .iter()
            .flat_map(|e| e.attention_mask.iter().map(|&x| i64::from(x)))
            .collect();

        let labels: Vec<i64> = items
            .iter()
            .flat_map(|e| e.labels.iter().map(|&x| i64::from(x)))
            .collect();

        let dec_inputs: Vec<i64> = items
            .iter()
            .flat_map(|e| shift_right(&e.labels, self.decoder_start_id).into_iter().map(i64::from))
            .collect();

        Seq2SeqBatch {
            input_ids:         self.int_tensor(input_ids, batch_size, seq_len),
            attention_mask:    self.int_tensor(mask, batch_size, seq_len),
            decoder_input_ids: self.int_tensor(dec_inputs, batch_size, seq_len),
            labels:            self.int_tensor(labels, batch_size, seq_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_shift_right() {
        assert_eq!(shift_right(&[5, 6, 7], 2), vec![2, 5, 6]);
        assert_eq!(shift_right(&[5], 2), vec![2]);
        assert!(shift_right(&[], 2).is_empty());
    }

    #[test]
    fn test_batch_shapes_and_values() {
        let device  = Default::default();
        let batcher = Seq2SeqBatcher::<TestBackend>::new(device, 2);
        let items = vec![
            TokenizedExample::from_ids(&[7, 8, 9], 4, 0),
            TokenizedExample::from_ids(&[4], 4, 0),
        ];

        let batch = batcher.batch(items);
        assert_eq!(batch.input_ids.dims(), [2, 4]);
        assert_eq!(batch.decoder_input_ids.dims(), [2, 4]);

        let dec: Vec<i64> = batch
            .decoder_input_ids
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(dec, vec![2, 7, 8, 9, 2, 4, 0, 0]);

        let mask: Vec<i64> = batch.attention_mask.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(mask, vec![1, 1, 1, 0, 1, 0, 0, 0]);
    }
}
