//! Quality gate applied to every classification result.

use crate::abundance::SampleAbundanceTable;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Fewer species rows than this is a degenerate result.
    pub min_species: usize,
    /// Highest acceptable unclassified read fraction, in [0, 1].
    pub max_unclassified_fraction: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            min_species: 3,
            max_unclassified_fraction: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub passed: bool,
    /// Why the result was rejected; empty when it passed.
    pub reasons: Vec<String>,
}

impl QualityAssessment {
    pub fn summary(&self) -> String {
        if self.passed {
            "passed".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

impl QualityThresholds {
    pub fn assess(&self, table: &SampleAbundanceTable) -> QualityAssessment {
        let mut reasons = Vec::new();
        if table.len() < self.min_species {
            reasons.push(format!(
                "only {} species detected (minimum {})",
                table.len(),
                self.min_species
            ));
        }
        let unclassified = table.unclassified_fraction();
        if unclassified > self.max_unclassified_fraction {
            reasons.push(format!(
                "{:.1}% of reads unclassified (maximum {:.1}%)",
                unclassified * 100.0,
                self.max_unclassified_fraction * 100.0
            ));
        }
        QualityAssessment {
            passed: reasons.is_empty(),
            reasons,
        }
    }
}
