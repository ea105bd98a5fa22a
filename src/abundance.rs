//! Per-sample abundance data.
//!
//! A [`SampleAbundanceTable`] is the hand-off format between every stage of
//! the pipeline: the report parser and the legacy fallback produce one, the
//! clinical filter derives a new one from it, and the dysbiosis scorer reads
//! one. Tables are immutable once built. Percentages are always computed from
//! the read counts of the records the table holds, so they describe exactly
//! the population in the table and sum to 100.

use crate::bio::taxonomy::{extract_genus, infer_kingdom, TaxonomyMapper, UNKNOWN};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Clinical priority tier assigned by the clinical filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClinicalRelevance {
    High,
    Moderate,
    Low,
    Excluded,
}

impl ClinicalRelevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicalRelevance::High => "HIGH",
            ClinicalRelevance::Moderate => "MODERATE",
            ClinicalRelevance::Low => "LOW",
            ClinicalRelevance::Excluded => "EXCLUDED",
        }
    }
}

/// One taxon observed in one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbundanceRecord {
    /// Name as reported by the classifier.
    pub species: String,
    pub genus: String,
    /// `"Unknown"` when the name could not be mapped.
    pub phylum: String,
    pub kingdom: String,
    pub read_count: u64,
    /// Share of the table's reads, in percent. Set by the owning table.
    pub percentage: f64,
    /// `None` until the clinical filter has tagged the record.
    pub relevance: Option<ClinicalRelevance>,
}

impl AbundanceRecord {
    /// Builds a record from a reported name, deriving genus and phylum.
    ///
    /// `kingdom` is used as given when present, otherwise inferred from the
    /// mapped phylum.
    pub fn from_name(
        species: &str,
        read_count: u64,
        kingdom: Option<&str>,
        mapper: &TaxonomyMapper,
    ) -> Self {
        let species = species.trim().to_string();
        let phylum = mapper.map_to_phylum(&species);
        let kingdom = match kingdom {
            Some(k) if !k.trim().is_empty() => k.trim().to_string(),
            _ => infer_kingdom(&phylum).to_string(),
        };
        AbundanceRecord {
            genus: extract_genus(&species),
            species,
            phylum,
            kingdom,
            read_count,
            percentage: 0.0,
            relevance: None,
        }
    }

    pub fn has_known_phylum(&self) -> bool {
        self.phylum != UNKNOWN
    }
}

/// Ordered collection of [`AbundanceRecord`]s for one sample (barcode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleAbundanceTable {
    sample_id: String,
    records: Vec<AbundanceRecord>,
    /// Reads the classifier could not assign at all.
    unclassified_reads: u64,
    /// All reads in the sample, classified or not.
    total_reads: u64,
}

impl SampleAbundanceTable {
    /// Creates a table and computes each record's percentage.
    ///
    /// # Arguments
    ///
    /// * `sample_id` - The sample/barcode identifier.
    /// * `records` - Taxa observed; records with zero reads are dropped.
    /// * `unclassified_reads` - Reads left unclassified by the producer.
    /// * `total_reads` - All reads in the sample. Raised to at least
    ///   classified + unclassified when the producer under-reports it.
    pub fn new(
        sample_id: impl Into<String>,
        records: Vec<AbundanceRecord>,
        unclassified_reads: u64,
        total_reads: u64,
    ) -> Self {
        let sample_id = sample_id.into();
        let before = records.len();
        let mut records: Vec<AbundanceRecord> =
            records.into_iter().filter(|r| r.read_count > 0).collect();
        if records.len() != before {
            debug!(
                "Sample {}: dropped {} zero-count record(s)",
                sample_id,
                before - records.len()
            );
        }

        let classified: u64 = records.iter().map(|r| r.read_count).sum();
        for record in &mut records {
            record.percentage = 100.0 * record.read_count as f64 / classified as f64;
        }

        SampleAbundanceTable {
            sample_id,
            records,
            unclassified_reads,
            total_reads: total_reads.max(classified + unclassified_reads),
        }
    }

    /// Derives a new table for the same sample holding a subset of records.
    ///
    /// Read totals are carried over; percentages are recomputed against the
    /// new records only.
    pub fn with_records(&self, records: Vec<AbundanceRecord>) -> Self {
        SampleAbundanceTable::new(
            self.sample_id.clone(),
            records,
            self.unclassified_reads,
            self.total_reads,
        )
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn records(&self) -> &[AbundanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of read counts over the table's records.
    pub fn classified_reads(&self) -> u64 {
        self.records.iter().map(|r| r.read_count).sum()
    }

    pub fn unclassified_reads(&self) -> u64 {
        self.unclassified_reads
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    /// Fraction of the sample's reads left unclassified, in [0, 1].
    ///
    /// A sample with no reads at all counts as fully unclassified.
    pub fn unclassified_fraction(&self) -> f64 {
        if self.total_reads == 0 {
            return 1.0;
        }
        self.unclassified_reads as f64 / self.total_reads as f64
    }

    /// Sum of record percentages; 100 for any non-empty table.
    pub fn percentage_sum(&self) -> f64 {
        self.records.iter().map(|r| r.percentage).sum()
    }

    /// Aggregates the table's percentages by phylum.
    pub fn phylum_distribution(&self) -> PhylumDistribution {
        PhylumDistribution::from_table(self)
    }
}

/// Phylum name to aggregate percentage, largest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhylumDistribution(IndexMap<String, f64>);

impl PhylumDistribution {
    /// Sums record percentages per phylum. `"Unknown"` is kept as its own
    /// entry so the values still sum to 100.
    pub fn from_table(table: &SampleAbundanceTable) -> Self {
        let mut totals: IndexMap<String, f64> = IndexMap::new();
        for record in table.records() {
            *totals.entry(record.phylum.clone()).or_insert(0.0) += record.percentage;
        }
        totals.sort_by(|_, a, _, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        PhylumDistribution(totals)
    }

    /// Builds a distribution from explicit values (used for calibration).
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        PhylumDistribution(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Percentage for a phylum; 0 when absent.
    pub fn get(&self, phylum: &str) -> f64 {
        self.0.get(phylum).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
