// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure the pipeline can hit maps to one of these
// variants. None of them is recovered locally: the first error
// aborts the run and the process exits non-zero.
//
// The application layer wraps these in anyhow with context, so
// callers that need the category use
//   err.downcast_ref::<FineTuneError>()
//
// Reference: Rust Book §9 (Recoverable Errors with Result)

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FineTuneError {
    /// A required local file or directory is absent
    #[error("resource not found: {}", path.display())]
    ResourceNotFound { path: PathBuf },

    /// Malformed JSON, corrupt vocabulary, misaligned columns, bad example shape
    #[error("format error: {0}")]
    Format(String),

    /// A checkpoint tensor does not fit the (post-resize) model parameter
    #[error("shape mismatch for '{name}': model has {expected:?}, checkpoint has {found:?}")]
    ShapeMismatch {
        name:     String,
        expected: Vec<usize>,
        found:    Vec<usize>,
    },

    /// The execution engine failed during a forward/backward pass
    #[error("resource exhaustion during {stage}: {detail}")]
    ResourceExhaustion { stage: String, detail: String },

    /// An option value the trainer cannot run with
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FineTuneError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::ResourceNotFound { path: path.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}

impl From<serde_json::Error> for FineTuneError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(format!("invalid JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, FineTuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_format_errors() {
        let err: FineTuneError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, FineTuneError::Format(_)));
    }

    #[test]
    fn test_shape_mismatch_message_names_parameter() {
        let err = FineTuneError::ShapeMismatch {
            name:     "model.shared.weight".into(),
            expected: vec![10, 4],
            found:    vec![12, 4],
        };
        let msg = err.to_string();
        assert!(msg.contains("model.shared.weight"));
        assert!(msg.contains("[10, 4]"));
    }
}
