//! Dysbiosis scoring.
//!
//! Compares a sample's phylum distribution with healthy reference ranges.
//! Each tracked phylum contributes `weight * distance` where the distance is
//! how many percentage points the observed value lies outside `[low, high]`
//! (0 inside the range). The weighted sum is the dysbiosis index, which is
//! then bucketed into a category using configurable thresholds.

use crate::abundance::{PhylumDistribution, SampleAbundanceTable};
use crate::bio::taxonomy::UNKNOWN;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_weight() -> f64 {
    1.0
}

/// Healthy range for one phylum, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub low: f64,
    pub high: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl ReferenceRange {
    pub fn new(low: f64, high: f64) -> Self {
        ReferenceRange {
            low,
            high,
            weight: default_weight(),
        }
    }

    /// Distance from `observed` to the nearer bound; 0 when inside.
    pub fn deviation(&self, observed: f64) -> f64 {
        if observed < self.low {
            self.low - observed
        } else if observed > self.high {
            observed - self.high
        } else {
            0.0
        }
    }
}

/// Adult gut reference ranges for the major phyla.
pub fn default_reference_ranges() -> BTreeMap<String, ReferenceRange> {
    [
        ("Bacillota", 20.0, 70.0),
        ("Bacteroidota", 4.0, 40.0),
        ("Pseudomonadota", 2.0, 35.0),
        ("Actinomycetota", 0.0, 15.0),
        ("Verrucomicrobiota", 0.0, 10.0),
        ("Fusobacteriota", 0.0, 2.0),
    ]
    .into_iter()
    .map(|(phylum, low, high)| (phylum.to_string(), ReferenceRange::new(low, high)))
    .collect()
}

/// Scorer thresholds and reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DysbiosisConfig {
    /// Indices below this are `normal`.
    pub normal_below: f64,
    /// Indices at or above this are `severe`.
    pub severe_at: f64,
    pub reference_ranges: BTreeMap<String, ReferenceRange>,
}

impl Default for DysbiosisConfig {
    fn default() -> Self {
        DysbiosisConfig {
            normal_below: 5.0,
            severe_at: 15.0,
            reference_ranges: default_reference_ranges(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DysbiosisCategory {
    Normal,
    Mild,
    Severe,
    /// No classified, phylum-mapped reads were left to compare.
    InsufficientData,
}

impl DysbiosisCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DysbiosisCategory::Normal => "normal",
            DysbiosisCategory::Mild => "mild",
            DysbiosisCategory::Severe => "severe",
            DysbiosisCategory::InsufficientData => "insufficient_data",
        }
    }
}

/// One reference-tracked phylum's contribution to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhylumDeviation {
    pub phylum: String,
    pub observed: f64,
    pub low: f64,
    pub high: f64,
    pub deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DysbiosisResult {
    pub index: f64,
    pub category: DysbiosisCategory,
    /// Per-phylum breakdown, in reference table order.
    pub deviations: Vec<PhylumDeviation>,
    /// Share of the profile with no mapped phylum (not scored).
    pub unknown_percentage: f64,
}

impl DysbiosisResult {
    fn insufficient(unknown_percentage: f64) -> Self {
        DysbiosisResult {
            index: 0.0,
            category: DysbiosisCategory::InsufficientData,
            deviations: Vec::new(),
            unknown_percentage,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.category == DysbiosisCategory::InsufficientData
    }
}

#[derive(Debug, Clone, Default)]
pub struct DysbiosisScorer {
    config: DysbiosisConfig,
}

impl DysbiosisScorer {
    pub fn new(config: DysbiosisConfig) -> Self {
        DysbiosisScorer { config }
    }

    pub fn config(&self) -> &DysbiosisConfig {
        &self.config
    }

    /// Scores a filtered table.
    pub fn score(&self, table: &SampleAbundanceTable) -> DysbiosisResult {
        let result = self.score_distribution(&table.phylum_distribution());
        info!(
            "Sample '{}': dysbiosis index {:.2} ({})",
            table.sample_id(),
            result.index,
            result.category.as_str()
        );
        result
    }

    /// Scores a phylum distribution directly.
    ///
    /// Phyla missing from the distribution count as 0%. The `"Unknown"`
    /// bucket is never compared against a range.
    pub fn score_distribution(&self, distribution: &PhylumDistribution) -> DysbiosisResult {
        let unknown_percentage = distribution.get(UNKNOWN);
        let known_total = distribution.total() - unknown_percentage;
        if distribution.is_empty() || known_total <= 0.0 {
            debug!("No phylum-mapped abundance to score");
            return DysbiosisResult::insufficient(unknown_percentage);
        }

        let mut index = 0.0;
        let mut deviations = Vec::with_capacity(self.config.reference_ranges.len());
        for (phylum, range) in &self.config.reference_ranges {
            if phylum == UNKNOWN {
                continue;
            }
            let observed = distribution.get(phylum);
            let deviation = range.deviation(observed);
            index += range.weight * deviation;
            deviations.push(PhylumDeviation {
                phylum: phylum.clone(),
                observed,
                low: range.low,
                high: range.high,
                deviation,
            });
        }

        DysbiosisResult {
            index,
            category: self.categorize(index),
            deviations,
            unknown_percentage,
        }
    }

    pub fn categorize(&self, index: f64) -> DysbiosisCategory {
        if index < self.config.normal_below {
            DysbiosisCategory::Normal
        } else if index < self.config.severe_at {
            DysbiosisCategory::Mild
        } else {
            DysbiosisCategory::Severe
        }
    }
}

/// Scores a table against explicit reference ranges with default thresholds.
pub fn score(
    table: &SampleAbundanceTable,
    reference_ranges: &BTreeMap<String, ReferenceRange>,
) -> DysbiosisResult {
    DysbiosisScorer::new(DysbiosisConfig {
        reference_ranges: reference_ranges.clone(),
        ..DysbiosisConfig::default()
    })
    .score(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundance::AbundanceRecord;
    use crate::bio::taxonomy::TaxonomyMapper;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn three_phylum_ranges() -> BTreeMap<String, ReferenceRange> {
        [
            ("Bacillota", ReferenceRange::new(20.0, 70.0)),
            ("Bacteroidota", ReferenceRange::new(4.0, 40.0)),
            ("Pseudomonadota", ReferenceRange::new(2.0, 35.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn test_out_of_range_profile_is_not_normal() {
        let scorer = DysbiosisScorer::new(DysbiosisConfig {
            reference_ranges: three_phylum_ranges(),
            ..DysbiosisConfig::default()
        });
        let dist = PhylumDistribution::from_pairs([
            ("Bacillota", 15.0),
            ("Bacteroidota", 2.0),
            ("Pseudomonadota", 40.0),
        ]);
        let result = scorer.score_distribution(&dist);

        let devs: Vec<f64> = result.deviations.iter().map(|d| d.deviation).collect();
        // BTreeMap order: Bacillota, Bacteroidota, Pseudomonadota
        assert_eq!(devs, vec![5.0, 2.0, 5.0]);
        assert_relative_eq!(result.index, 12.0);
        assert_eq!(result.category, DysbiosisCategory::Mild);
    }

    #[test]
    fn test_healthy_profile_is_normal() {
        let scorer = DysbiosisScorer::default();
        let dist = PhylumDistribution::from_pairs([
            ("Bacillota", 55.0),
            ("Bacteroidota", 30.0),
            ("Pseudomonadota", 5.0),
            ("Actinomycetota", 8.0),
            ("Verrucomicrobiota", 2.0),
        ]);
        let result = scorer.score_distribution(&dist);
        assert_relative_eq!(result.index, 0.0);
        assert_eq!(result.category, DysbiosisCategory::Normal);
    }

    #[test]
    fn test_severe_and_weights() {
        let mut ranges = three_phylum_ranges();
        ranges.get_mut("Pseudomonadota").unwrap().weight = 2.0;
        let scorer = DysbiosisScorer::new(DysbiosisConfig {
            reference_ranges: ranges,
            ..DysbiosisConfig::default()
        });
        let dist = PhylumDistribution::from_pairs([
            ("Bacillota", 25.0),
            ("Bacteroidota", 10.0),
            ("Pseudomonadota", 65.0),
        ]);
        let result = scorer.score_distribution(&dist);
        assert_relative_eq!(result.index, 60.0);
        assert_eq!(result.category, DysbiosisCategory::Severe);
    }

    #[test]
    fn test_empty_table_is_insufficient() {
        let table = SampleAbundanceTable::new("empty", Vec::new(), 10, 10);
        let result = score(&table, &default_reference_ranges());
        assert_eq!(result.category, DysbiosisCategory::InsufficientData);
        assert!(result.is_insufficient());
        assert_relative_eq!(result.index, 0.0);
        assert_eq!(serde_json::to_string(&result.category).unwrap(), "\"insufficient_data\"");
    }

    #[test]
    fn test_unknown_only_is_insufficient() {
        let mapper = TaxonomyMapper::new();
        let table = SampleAbundanceTable::new(
            "s",
            vec![AbundanceRecord::from_name("Mystery organism", 10, Some("Bacteria"), &mapper)],
            0,
            10,
        );
        let result = DysbiosisScorer::default().score(&table);
        assert!(result.is_insufficient());
        assert_relative_eq!(result.unknown_percentage, 100.0);
    }

    #[test]
    fn test_unknown_not_compared() {
        let mut ranges = three_phylum_ranges();
        ranges.insert(UNKNOWN.to_string(), ReferenceRange::new(0.0, 0.0));
        let scorer = DysbiosisScorer::new(DysbiosisConfig {
            reference_ranges: ranges,
            ..DysbiosisConfig::default()
        });
        let dist = PhylumDistribution::from_pairs([
            ("Bacillota", 40.0),
            ("Bacteroidota", 20.0),
            ("Pseudomonadota", 10.0),
            (UNKNOWN, 30.0),
        ]);
        let result = scorer.score_distribution(&dist);
        assert_relative_eq!(result.index, 0.0);
        assert!(result.deviations.iter().all(|d| d.phylum != UNKNOWN));
    }

    #[test]
    fn test_category_thresholds() {
        let scorer = DysbiosisScorer::default();
        assert_eq!(scorer.categorize(0.0), DysbiosisCategory::Normal);
        assert_eq!(scorer.categorize(4.99), DysbiosisCategory::Normal);
        assert_eq!(scorer.categorize(5.0), DysbiosisCategory::Mild);
        assert_eq!(scorer.categorize(15.0), DysbiosisCategory::Severe);
    }

    /// Moves `value` away from `range` by `extra`, never toward it.
    fn push_out(value: f64, extra: f64, range: &ReferenceRange) -> f64 {
        if value < range.low {
            (value - extra).max(0.0)
        } else if value > range.high {
            value + extra
        } else if extra > 0.0 {
            range.high + extra
        } else {
            value
        }
    }

    proptest! {
        #[test]
        fn prop_index_monotone_in_deviation(
            values in prop::collection::vec(0.0f64..100.0, 6),
            extras in prop::collection::vec(0.0f64..50.0, 6),
        ) {
            let scorer = DysbiosisScorer::default();
            let ranges: Vec<(String, ReferenceRange)> = scorer
                .config()
                .reference_ranges
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();

            let a = PhylumDistribution::from_pairs(
                ranges.iter().zip(&values).map(|((p, _), v)| (p.clone(), *v)),
            );
            let b = PhylumDistribution::from_pairs(
                ranges
                    .iter()
                    .zip(values.iter().zip(&extras))
                    .map(|((p, r), (v, e))| (p.clone(), push_out(*v, *e, r))),
            );

            let score_a = scorer.score_distribution(&a);
            let score_b = scorer.score_distribution(&b);
            prop_assume!(!score_a.is_insufficient() && !score_b.is_insufficient());
            prop_assert!(score_a.index >= 0.0);
            prop_assert!(score_b.index + 1e-9 >= score_a.index);
        }
    }
}
