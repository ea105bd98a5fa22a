//! Two-tier classification: primary source, quality gate, fallback source.

use super::quality::QualityThresholds;
use super::{ClassificationRequest, ClassificationSource, ClassifyError};
use crate::abundance::SampleAbundanceTable;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Which source produced a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSourceKind {
    Primary,
    Fallback,
}

impl ClassificationSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSourceKind::Primary => "primary",
            ClassificationSourceKind::Fallback => "fallback",
        }
    }
}

/// Result of [`FallbackManager::classify_with_fallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub table: SampleAbundanceTable,
    pub source: ClassificationSourceKind,
    /// Whether `table` passed the quality gate.
    pub quality_ok: bool,
    /// Why the primary result was not used, or why quality failed.
    pub error: Option<String>,
}

pub struct FallbackManager {
    primary: Box<dyn ClassificationSource>,
    fallback: Box<dyn ClassificationSource>,
    thresholds: QualityThresholds,
}

impl FallbackManager {
    pub fn new(
        primary: Box<dyn ClassificationSource>,
        fallback: Box<dyn ClassificationSource>,
        thresholds: QualityThresholds,
    ) -> Self {
        FallbackManager {
            primary,
            fallback,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Classifies one sample, falling back when the primary source fails or
    /// its result does not pass the quality gate.
    ///
    /// Each source is invoked at most once. Errors that would repeat on any
    /// source (bad parameters, bad input, cancellation) are returned without
    /// trying the fallback. When the fallback also fails, a primary result
    /// that merely failed the quality gate is still returned, flagged
    /// `quality_ok = false`; otherwise `ClassificationFailed` names both
    /// causes.
    pub fn classify_with_fallback(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationOutcome, ClassifyError> {
        let sample = &request.sample_id;

        let (low_quality_primary, primary_problem) = match self.primary.produce(request) {
            Ok(table) => {
                let quality = self.thresholds.assess(&table);
                if quality.passed {
                    info!("Sample '{}': using {} result", sample, self.primary.name());
                    return Ok(ClassificationOutcome {
                        table,
                        source: ClassificationSourceKind::Primary,
                        quality_ok: true,
                        error: None,
                    });
                }
                let problem = format!("{} result failed quality checks: {}", self.primary.name(), quality.summary());
                warn!("Sample '{}': {}", sample, problem);
                (Some(table), problem)
            }
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) => {
                let problem = format!("{} failed: {}", self.primary.name(), e);
                warn!("Sample '{}': {}", sample, problem);
                (None, problem)
            }
        };

        if request.cancel.is_cancelled() {
            return Err(ClassifyError::Cancelled);
        }

        info!("Sample '{}': trying {} classification", sample, self.fallback.name());
        match self.fallback.produce(request) {
            Ok(table) => {
                let quality = self.thresholds.assess(&table);
                let error = if quality.passed {
                    primary_problem
                } else {
                    format!(
                        "{}; {} result failed quality checks: {}",
                        primary_problem,
                        self.fallback.name(),
                        quality.summary()
                    )
                };
                info!(
                    "Sample '{}': using {} result (quality {})",
                    sample,
                    self.fallback.name(),
                    if quality.passed { "ok" } else { "low" }
                );
                Ok(ClassificationOutcome {
                    table,
                    source: ClassificationSourceKind::Fallback,
                    quality_ok: quality.passed,
                    error: Some(error),
                })
            }
            Err(ClassifyError::Cancelled) => Err(ClassifyError::Cancelled),
            Err(fallback_error) => match low_quality_primary {
                Some(table) => {
                    warn!(
                        "Sample '{}': {} failed ({}); keeping low-quality primary result",
                        sample,
                        self.fallback.name(),
                        fallback_error
                    );
                    Ok(ClassificationOutcome {
                        table,
                        source: ClassificationSourceKind::Primary,
                        quality_ok: false,
                        error: Some(format!(
                            "{}; {} failed: {}",
                            primary_problem,
                            self.fallback.name(),
                            fallback_error
                        )),
                    })
                }
                None => Err(ClassifyError::ClassificationFailed {
                    primary: primary_problem,
                    fallback: fallback_error.to_string(),
                }),
            },
        }
    }
}
