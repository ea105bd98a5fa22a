//! Taxonomic classification with automatic fallback.
//!
//! A [`ClassificationSource`] turns a sample's reads into a
//! [`SampleAbundanceTable`]. Two implementations exist: the Kraken2 adapter
//! ([`kraken::KrakenClassifier`]) and the legacy pipeline adapter
//! ([`legacy::LegacyPipeline`]). The [`fallback::FallbackManager`] tries the
//! first, checks the result with [`quality::QualityThresholds`], and falls
//! back to the second when needed.

pub mod fallback;
pub mod kraken;
pub mod legacy;
pub mod process;
pub mod quality;

use crate::abundance::SampleAbundanceTable;
use crate::io::fastq::InputError;
use crate::io::kraken_report::ReportParseError;
use crate::utils::CancellationToken;
use std::path::PathBuf;
use thiserror::Error;

pub use fallback::{ClassificationOutcome, ClassificationSourceKind, FallbackManager};
pub use kraken::KrakenClassifier;
pub use legacy::LegacyPipeline;
pub use quality::{QualityAssessment, QualityThresholds};

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Invalid classifier configuration: {0}")]
    Config(String),

    #[error("Reference database {path} unusable: {reason}")]
    Database { path: PathBuf, reason: String },

    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("{program} timed out after {timeout_secs}s and was killed")]
    ExecutionTimeout { program: String, timeout_secs: u64 },

    #[error("{program} failed: {detail}")]
    Execution { program: String, detail: String },

    #[error("Could not parse classifier output: {0}")]
    Parse(#[from] ReportParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Classification failed. Primary: {primary}. Fallback: {fallback}")]
    ClassificationFailed { primary: String, fallback: String },

    #[error("Cancelled")]
    Cancelled,
}

impl ClassifyError {
    /// Whether another classification source should be tried after this
    /// error. Bad parameters and bad inputs would fail the same way again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ClassifyError::Config(_)
                | ClassifyError::Input(_)
                | ClassifyError::ClassificationFailed { .. }
                | ClassifyError::Cancelled
        )
    }
}

/// Everything a source needs to classify one sample.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub sample_id: String,
    pub fastq_files: Vec<PathBuf>,
    /// Reference database for the sample's context.
    pub db_path: PathBuf,
    /// Kraken2 `--confidence`, in [0, 1].
    pub confidence: f64,
    pub cancel: CancellationToken,
}

impl ClassificationRequest {
    pub fn new(
        sample_id: impl Into<String>,
        fastq_files: Vec<PathBuf>,
        db_path: impl Into<PathBuf>,
        confidence: f64,
    ) -> Self {
        ClassificationRequest {
            sample_id: sample_id.into(),
            fastq_files,
            db_path: db_path.into(),
            confidence,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A producer of abundance tables.
pub trait ClassificationSource: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    fn produce(&self, request: &ClassificationRequest) -> Result<SampleAbundanceTable, ClassifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(!ClassifyError::Config("bad".into()).is_recoverable());
        assert!(!ClassifyError::Input(InputError::NoInputs).is_recoverable());
        assert!(!ClassifyError::Cancelled.is_recoverable());
        assert!(ClassifyError::Database {
            path: PathBuf::from("/db"),
            reason: "missing".into()
        }
        .is_recoverable());
        assert!(ClassifyError::ExecutionTimeout {
            program: "kraken2".into(),
            timeout_secs: 1
        }
        .is_recoverable());
        assert!(ClassifyError::Parse(ReportParseError::Empty(PathBuf::from("r"))).is_recoverable());
    }
}
