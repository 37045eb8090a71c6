// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Writes training progress to CSV files under the logging dir.
//
//   train_log.csv — one row every `logging_steps` optimizer updates
//     step,epoch,loss,learning_rate
//     10,0.625000,3.412000,0.000018
//
//   eval_log.csv  — one row per evaluation
//     epoch,eval_loss,token_accuracy,mean_generated_len
//     1,3.120000,0.041000,12.500000
//
// Headers are written once; later runs append to the same files.
//
// Reference: Rust Book §12 (I/O and File Handling)

use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::error::Result;

/// Running training loss over one logging interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Optimizer updates completed so far
    pub step: usize,

    /// Fractional epoch, e.g. 0.5 = halfway through the first epoch
    pub epoch: f64,

    /// Mean micro-batch loss since the previous log line
    pub loss: f64,

    pub learning_rate: f64,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub epoch: usize,

    /// Mean cross-entropy over the eval batches
    pub eval_loss: f64,

    /// Share of real label tokens reproduced by greedy generation.
    /// None when evaluation ran without generation.
    pub token_accuracy: Option<f64>,

    pub mean_generated_len: Option<f64>,
}

pub struct MetricsLogger {
    train_csv: PathBuf,
    eval_csv:  PathBuf,
}

fn ensure_header(path: &Path, header: &str) -> Result<()> {
    if !path.exists() {
        let mut f = fs::File::create(path)?;
        writeln!(f, "{header}")?;
        tracing::debug!("Created metrics CSV: '{}'", path.display());
    }
    Ok(())
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

impl MetricsLogger {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let train_csv = dir.join("train_log.csv");
        let eval_csv  = dir.join("eval_log.csv");
        ensure_header(&train_csv, "step,epoch,loss,learning_rate")?;
        ensure_header(&eval_csv, "epoch,eval_loss,token_accuracy,mean_generated_len")?;

        Ok(Self { train_csv, eval_csv })
    }

    pub fn log_step(&self, m: &StepMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.train_csv)?;
        writeln!(f, "{},{:.6},{:.6},{:.8}", m.step, m.epoch, m.loss, m.learning_rate)?;
        Ok(())
    }

    pub fn log_eval(&self, m: &EvalMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.eval_csv)?;
        writeln!(
            f,
            "{},{:.6},{},{}",
            m.epoch,
            m.eval_loss,
            opt(m.token_accuracy),
            opt(m.mean_generated_len),
        )?;

        tracing::debug!("Logged eval metrics for epoch {}", m.epoch);
        Ok(())
    }

    pub fn train_csv(&self) -> &Path {
        &self.train_csv
    }

    pub fn eval_csv(&self) -> &Path {
        &self.eval_csv
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_appended_under_one_header() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path().join("logs")).unwrap();

        logger.log_step(&StepMetrics { step: 10, epoch: 0.5, loss: 2.0, learning_rate: 1e-5 }).unwrap();
        logger.log_step(&StepMetrics { step: 20, epoch: 1.0, loss: 1.5, learning_rate: 0.0 }).unwrap();

        // Re-opening must not write a second header
        let logger = MetricsLogger::new(dir.path().join("logs")).unwrap();
        logger
            .log_eval(&EvalMetrics {
                epoch:              1,
                eval_loss:          1.25,
                token_accuracy:     None,
                mean_generated_len: None,
            })
            .unwrap();

        let train = fs::read_to_string(logger.train_csv()).unwrap();
        let lines: Vec<&str> = train.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "step,epoch,loss,learning_rate");
        assert!(lines[1].starts_with("10,0.500000,2.000000,"));

        let eval = fs::read_to_string(logger.eval_csv()).unwrap();
        assert_eq!(eval.lines().nth(1), Some("1,1.250000,,"));
    }
}
