// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Fine-tunes the seq2seq model with AdamW and gradient accumulation.
//
// One epoch:
//
//   for each micro-batch (shuffled, per_device_train_batch_size rows)
//       loss  = cross_entropy(model(batch), labels) / accumulation
//       grads = backward(loss)  → summed into the accumulator
//       every `accumulation` micro-batches:
//           AdamW step with the scheduled learning rate
//           log / checkpoint on their cadences
//   trailing partial window → one more update
//   evaluate (label-conditioned loss + greedy generation)
//
// so an epoch performs ceil(micro_batches / accumulation) updates.
//
// Key Burn insight:
//   - Training runs on an AutodiffBackend so backward() works
//   - model.valid() drops autodiff (and dropout) for evaluation
//   - Panics inside the engine are caught and reported as
//     ResourceExhaustion instead of tearing down the process
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

use crate::application::config::{EvaluationStrategy, TrainingArguments};
use crate::data::{batcher::Seq2SeqBatcher, dataset::LyricsDataset};
use crate::domain::error::{FineTuneError, Result};
use crate::infra::checkpoint::{CheckpointManager, TrainerState};
use crate::infra::metrics::{EvalMetrics, MetricsLogger, StepMetrics};
use crate::ml::generate::{greedy_generate, token_matches};
use crate::ml::model::{Seq2SeqConfig, Seq2SeqModel};

// ─── Learning-rate schedule ───────────────────────────────────────────────────
/// Linear warmup to `base_lr`, then linear decay to zero at `total` updates.
#[derive(Debug, Clone, Copy)]
pub struct LinearSchedule {
    base_lr: f64,
    warmup:  usize,
    total:   usize,
}

impl LinearSchedule {
    pub fn new(base_lr: f64, warmup: usize, total: usize) -> Self {
        Self { base_lr, warmup, total }
    }

    /// Learning rate for the 0-based update `step`.
    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup {
            return self.base_lr * step as f64 / self.warmup as f64;
        }
        let remaining = self.total.saturating_sub(step) as f64;
        let span      = self.total.saturating_sub(self.warmup).max(1) as f64;
        self.base_lr * remaining / span
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub optimizer_steps: usize,
    pub micro_steps:     usize,
    pub examples_seen:   usize,
    /// Mean of the per-update losses
    pub train_loss:      f64,
    pub evaluations:     Vec<EvalMetrics>,
    pub runtime_secs:    f64,
}

#[derive(Debug, Default)]
struct Progress {
    global_step:      usize,
    micro_steps:      usize,
    examples_seen:    usize,
    interval_loss:    f64,
    interval_updates: usize,
    loss_sum:         f64,
}

/// Run `f`, turning an engine panic into ResourceExhaustion.
fn guarded<T>(stage: &str, f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "execution engine aborted".to_string());
        FineTuneError::ResourceExhaustion { stage: stage.to_string(), detail }
    })
}

// ─── Trainer ──────────────────────────────────────────────────────────────────
pub struct Trainer<'a> {
    args:                  &'a TrainingArguments,
    model_cfg:             &'a Seq2SeqConfig,
    checkpoints:           &'a CheckpointManager,
    metrics:               &'a MetricsLogger,
    generation_max_length: usize,
}

impl<'a> Trainer<'a> {
    pub fn new(
        args:                  &'a TrainingArguments,
        model_cfg:             &'a Seq2SeqConfig,
        checkpoints:           &'a CheckpointManager,
        metrics:               &'a MetricsLogger,
        generation_max_length: usize,
    ) -> Self {
        Self { args, model_cfg, checkpoints, metrics, generation_max_length }
    }

    /// Optimizer updates one epoch over `n_examples` performs.
    pub fn updates_per_epoch(&self, n_examples: usize) -> usize {
        n_examples
            .div_ceil(self.args.per_device_train_batch_size)
            .div_ceil(self.args.gradient_accumulation_steps)
    }

    pub fn train<B: AutodiffBackend>(
        &self,
        mut model: Seq2SeqModel<B>,
        train_set: LyricsDataset,
        eval_set:  LyricsDataset,
        device:    &B::Device,
    ) -> Result<(Seq2SeqModel<B>, TrainOutcome)> {
        let args = self.args;
        let n_examples = train_set.len();
        if n_examples == 0 {
            return Err(FineTuneError::format("training set is empty"));
        }

        let total_updates = self.updates_per_epoch(n_examples) * args.num_train_epochs;
        let schedule = LinearSchedule::new(args.learning_rate, args.warmup_steps, total_updates);
        tracing::info!(
            "Training: {} examples of length {}, {} epochs, batch {}, accumulation {}, {} updates",
            n_examples,
            train_set.seq_len(),
            args.num_train_epochs,
            args.per_device_train_batch_size,
            args.gradient_accumulation_steps,
            total_updates
        );

        // ── AdamW optimiser ───────────────────────────────────────────────────
        // θ = θ - lr * (m̂ / (√v̂ + ε) + λθ)   (decay decoupled from the gradient)
        let mut optim = AdamWConfig::new()
            .with_weight_decay(args.weight_decay as f32)
            .init();
        let mut accumulator = GradientsAccumulator::<Seq2SeqModel<B>>::new();

        let batcher = Seq2SeqBatcher::<B>::new(device.clone(), self.model_cfg.decoder_start_token_id as u32);
        let mut rng = StdRng::seed_from_u64(args.seed);

        let mut progress    = Progress::default();
        let mut evaluations = Vec::new();
        let started = Instant::now();

        // ── Epoch loop ────────────────────────────────────────────────────────
        for epoch in 1..=args.num_train_epochs {
            let loader = DataLoaderBuilder::new(batcher.clone())
                .batch_size(args.per_device_train_batch_size)
                .shuffle(rng.gen::<u64>())
                .num_workers(1)
                .build(train_set.clone());

            let mut window      = 0usize;
            let mut window_loss = 0.0f64;

            for batch in loader.iter() {
                let rows = batch.input_ids.dims()[0];
                let (loss, grads) = guarded("forward/backward", || {
                    let loss  = model.forward_loss(batch);
                    let value = loss.clone().into_scalar().elem::<f64>();
                    let grads = loss.div_scalar(args.gradient_accumulation_steps as f64).backward();
                    (value, GradientsParams::from_grads(grads, &model))
                })?;

                accumulator.accumulate(&model, grads);
                window      += 1;
                window_loss += loss;
                progress.micro_steps   += 1;
                progress.examples_seen += rows;
                tracing::debug!("micro-step {} loss={:.4}", progress.micro_steps, loss);

                if window == args.gradient_accumulation_steps {
                    model = self.apply_update(model, &mut optim, &mut accumulator, &schedule, window_loss / window as f64, &mut progress, n_examples)?;
                    window      = 0;
                    window_loss = 0.0;
                }
            }

            if window > 0 {
                model = self.apply_update(model, &mut optim, &mut accumulator, &schedule, window_loss / window as f64, &mut progress, n_examples)?;
            }

            // ── Evaluation phase ──────────────────────────────────────────────
            if args.evaluation_strategy == EvaluationStrategy::Epoch {
                let metrics = self.evaluate(&model.valid(), &eval_set, epoch, device)?;
                self.metrics.log_eval(&metrics)?;
                evaluations.push(metrics);
            }
        }

        let outcome = TrainOutcome {
            optimizer_steps: progress.global_step,
            micro_steps:     progress.micro_steps,
            examples_seen:   progress.examples_seen,
            train_loss:      progress.loss_sum / progress.global_step.max(1) as f64,
            evaluations,
            runtime_secs:    started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            "Training complete: {} updates, {} examples, train_loss={:.4}, {:.1}s",
            outcome.optimizer_steps,
            outcome.examples_seen,
            outcome.train_loss,
            outcome.runtime_secs
        );
        Ok((model, outcome))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_update<B, O>(
        &self,
        model:       Seq2SeqModel<B>,
        optim:       &mut O,
        accumulator: &mut GradientsAccumulator<Seq2SeqModel<B>>,
        schedule:    &LinearSchedule,
        loss:        f64,
        progress:    &mut Progress,
        n_examples:  usize,
    ) -> Result<Seq2SeqModel<B>>
    where
        B: AutodiffBackend,
        O: Optimizer<Seq2SeqModel<B>, B>,
    {
        let lr    = schedule.lr_at(progress.global_step);
        let model = optim.step(lr, model, accumulator.grads());

        progress.global_step      += 1;
        progress.loss_sum         += loss;
        progress.interval_loss    += loss;
        progress.interval_updates += 1;

        let step  = progress.global_step;
        let epoch = progress.examples_seen as f64 / n_examples as f64;

        if self.args.logging_steps > 0 && step % self.args.logging_steps == 0 {
            let mean = progress.interval_loss / progress.interval_updates as f64;
            tracing::info!("step {:>5} | epoch {:.2} | loss {:.4} | lr {:.2e}", step, epoch, mean, lr);
            self.metrics.log_step(&StepMetrics { step, epoch, loss: mean, learning_rate: lr })?;
            progress.interval_loss    = 0.0;
            progress.interval_updates = 0;
        }

        if self.args.save_steps > 0 && step % self.args.save_steps == 0 {
            let state = TrainerState {
                global_step:   step,
                epoch,
                examples_seen: progress.examples_seen,
                loss,
                learning_rate: lr,
            };
            self.checkpoints.save(&model, self.model_cfg, &state)?;
            self.checkpoints.rotate(self.args.save_total_limit)?;
        }

        Ok(model)
    }

    /// Label-conditioned loss over the eval set, plus greedy-generation
    /// token accuracy when predict_with_generate is on.
    pub fn evaluate<B: Backend>(
        &self,
        model:    &Seq2SeqModel<B>,
        eval_set: &LyricsDataset,
        epoch:    usize,
        device:   &B::Device,
    ) -> Result<EvalMetrics> {
        let batcher = Seq2SeqBatcher::<B>::new(device.clone(), self.model_cfg.decoder_start_token_id as u32);
        let generate = self.args.predict_with_generate;

        let mut loss_sum  = 0.0f64;
        let mut batches   = 0usize;
        let mut matched   = 0usize;
        let mut total     = 0usize;
        let mut gen_len   = 0usize;
        let mut gen_count = 0usize;

        for chunk in eval_set.examples().chunks(self.args.per_device_eval_batch_size) {
            let batch = batcher.batch(chunk.to_vec());
            let loss  = guarded("evaluation", || {
                model.forward_loss(batch.clone()).into_scalar().elem::<f64>()
            })?;
            loss_sum += loss;
            batches  += 1;

            if generate {
                let generated = guarded("generation", || {
                    greedy_generate(model, batch.input_ids, batch.attention_mask, self.generation_max_length)
                })?;
                for (seq, example) in generated.iter().zip(chunk) {
                    let (m, t) = token_matches(seq, &example.labels, example.real_tokens());
                    matched   += m;
                    total     += t;
                    gen_len   += seq.len();
                    gen_count += 1;
                }
            }
        }

        let metrics = EvalMetrics {
            epoch,
            eval_loss:          if batches > 0 { loss_sum / batches as f64 } else { f64::NAN },
            token_accuracy:     generate.then(|| if total > 0 { matched as f64 / total as f64 } else { 0.0 }),
            mean_generated_len: generate.then(|| if gen_count > 0 { gen_len as f64 / gen_count as f64 } else { 0.0 }),
        };

        tracing::info!(
            "Eval epoch {} | eval_loss={:.4} | token_acc={} | gen_len={}",
            epoch,
            metrics.eval_loss,
            metrics.token_accuracy.map(|a| format!("{:.1}%", a * 100.0)).unwrap_or_else(|| "-".into()),
            metrics.mean_generated_len.map(|l| format!("{l:.1}")).unwrap_or_else(|| "-".into()),
        );
        Ok(metrics)
    }
}
