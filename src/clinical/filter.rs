//! Clinical relevance filtering.
//!
//! Reduces a classifier's species list to what a clinical reviewer should
//! see for a given database context (bacterial panel, parasite panel, ...).
//! Rules are applied in a fixed order:
//!
//! 1. kingdom must be in the context's allowed set
//! 2. names matching an exclude pattern are dropped
//! 3. if the context has include patterns, names must match one
//! 4. survivors are tagged HIGH / MODERATE / LOW from the relevance lists
//! 5. LOW records under the context's minimum abundance are dropped
//! 6. percentages are recomputed over the survivors
//!
//! All rule tables are plain data loaded from configuration.

use crate::abundance::{AbundanceRecord, ClinicalRelevance, SampleAbundanceTable};
use log::{debug, info};
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Unknown database context '{0}'")]
    UnknownContext(String),

    #[error("Invalid name pattern in context '{context}': {source}")]
    InvalidPattern {
        context: String,
        #[source]
        source: regex::Error,
    },
}

/// Ordered named lists of clinically relevant taxa.
///
/// An entry containing a space names one species exactly; any other entry
/// names a whole genus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceLists {
    /// Recognised pathogens.
    pub high: Vec<String>,
    /// Opportunists and pathobionts.
    pub moderate: Vec<String>,
}

impl Default for RelevanceLists {
    fn default() -> Self {
        let to_vec = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        RelevanceLists {
            high: to_vec(&[
                "Clostridioides difficile",
                "Salmonella",
                "Shigella",
                "Campylobacter",
                "Yersinia enterocolitica",
                "Vibrio cholerae",
                "Helicobacter pylori",
                "Listeria monocytogenes",
                "Giardia",
                "Entamoeba histolytica",
                "Cryptosporidium",
                "Cyclospora cayetanensis",
                "Strongyloides",
                "Ascaris",
                "Trichuris",
                "Necator",
                "Ancylostoma",
                "Taenia",
                "Schistosoma",
                "Plasmodium",
            ]),
            moderate: to_vec(&[
                "Escherichia coli",
                "Klebsiella",
                "Enterobacter",
                "Citrobacter",
                "Proteus",
                "Morganella",
                "Pseudomonas aeruginosa",
                "Enterococcus faecalis",
                "Enterococcus faecium",
                "Staphylococcus aureus",
                "Clostridium perfringens",
                "Bacteroides fragilis",
                "Fusobacterium nucleatum",
                "Candida",
                "Blastocystis",
                "Dientamoeba fragilis",
                "Enterobius vermicularis",
                "Hymenolepis",
            ]),
        }
    }
}

impl RelevanceLists {
    /// Tags a record; the HIGH list is consulted before MODERATE.
    pub fn classify(&self, species: &str, genus: &str) -> ClinicalRelevance {
        let matches = |entry: &String| {
            let entry = entry.trim();
            if entry.contains(' ') {
                entry == species.trim()
            } else {
                entry == genus
            }
        };
        if self.high.iter().any(matches) {
            ClinicalRelevance::High
        } else if self.moderate.iter().any(matches) {
            ClinicalRelevance::Moderate
        } else {
            ClinicalRelevance::Low
        }
    }
}

/// Per-context filtering rules as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Reference database directory for the primary classifier.
    pub database: PathBuf,
    /// Kingdoms kept by this context. Empty keeps everything.
    pub allowed_kingdoms: Vec<String>,
    /// Case-insensitive regexes; a match drops the record.
    pub exclude_patterns: Vec<String>,
    /// Case-insensitive regexes; when non-empty a record must match one.
    pub include_patterns: Vec<String>,
    /// Minimum percentage for LOW-relevance records.
    pub min_abundance: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            database: PathBuf::from("databases/standard"),
            allowed_kingdoms: Vec::new(),
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            min_abundance: 0.1,
        }
    }
}

/// Built-in contexts: `bacteria`, `parasites` and `standard`.
pub fn default_contexts() -> BTreeMap<String, ContextConfig> {
    let to_vec = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut contexts = BTreeMap::new();

    contexts.insert(
        "bacteria".to_string(),
        ContextConfig {
            database: PathBuf::from("databases/bacteria"),
            allowed_kingdoms: to_vec(&["Bacteria"]),
            exclude_patterns: to_vec(&[
                r"^Homo sapiens",
                // common reagent contaminants
                r"^(Ralstonia|Bradyrhizobium|Methylobacterium|Sphingomonas)\b",
                r"phage",
            ]),
            include_patterns: Vec::new(),
            min_abundance: 0.1,
        },
    );

    contexts.insert(
        "parasites".to_string(),
        ContextConfig {
            database: PathBuf::from("databases/parasites"),
            allowed_kingdoms: to_vec(&["Eukaryota"]),
            exclude_patterns: to_vec(&[
                r"^Homo sapiens",
                // plants, algae and plant pathogens
                r"^(Arabidopsis|Oryza|Zea|Triticum|Solanum|Glycine|Nicotiana)\b",
                r"^(Chlorella|Chlamydomonas|Volvox|Ostreococcus)\b",
                r"^(Phytophthora|Pythium|Plasmodiophora)\b",
                r"^(Meloidogyne|Heterodera|Globodera|Bursaphelenchus)\b",
            ]),
            include_patterns: to_vec(&[
                // protozoa
                r"^(Giardia|Entamoeba|Cryptosporidium|Cyclospora|Cystoisospora|Blastocystis|Dientamoeba|Balantioides|Trichomonas|Toxoplasma|Plasmodium|Leishmania|Trypanosoma)\b",
                r"^(Enterocytozoon|Encephalitozoon)\b",
                // helminths
                r"^(Ascaris|Enterobius|Trichuris|Strongyloides|Ancylostoma|Necator|Toxocara|Taenia|Hymenolepis|Echinococcus|Schistosoma|Fasciola)\b",
            ]),
            min_abundance: 0.01,
        },
    );

    contexts.insert(
        "standard".to_string(),
        ContextConfig {
            database: PathBuf::from("databases/standard"),
            allowed_kingdoms: to_vec(&["Bacteria", "Archaea", "Eukaryota", "Viruses"]),
            exclude_patterns: to_vec(&[r"^Homo sapiens"]),
            include_patterns: Vec::new(),
            min_abundance: 0.1,
        },
    );

    contexts
}

/// A context with its patterns compiled.
#[derive(Debug, Clone)]
struct CompiledContext {
    allowed_kingdoms: Vec<String>,
    exclude: RegexSet,
    include: RegexSet,
    min_abundance: f64,
}

impl CompiledContext {
    fn compile(name: &str, config: &ContextConfig) -> Result<Self, FilterError> {
        let build = |patterns: &[String]| {
            RegexSetBuilder::new(patterns)
                .case_insensitive(true)
                .build()
                .map_err(|source| FilterError::InvalidPattern {
                    context: name.to_string(),
                    source,
                })
        };
        Ok(CompiledContext {
            allowed_kingdoms: config.allowed_kingdoms.clone(),
            exclude: build(&config.exclude_patterns)?,
            include: build(&config.include_patterns)?,
            min_abundance: config.min_abundance,
        })
    }

    fn kingdom_allowed(&self, kingdom: &str) -> bool {
        self.allowed_kingdoms.is_empty()
            || self
                .allowed_kingdoms
                .iter()
                .any(|k| k.eq_ignore_ascii_case(kingdom))
    }

    /// Returns the relevance for a record, `Excluded` when rules 1 to 3
    /// reject it.
    fn screen(&self, record: &AbundanceRecord, relevance: &RelevanceLists) -> ClinicalRelevance {
        if !self.kingdom_allowed(&record.kingdom) {
            return ClinicalRelevance::Excluded;
        }
        if self.exclude.is_match(&record.species) {
            return ClinicalRelevance::Excluded;
        }
        if !self.include.is_empty() && !self.include.is_match(&record.species) {
            return ClinicalRelevance::Excluded;
        }
        relevance.classify(&record.species, &record.genus)
    }
}

/// Applies per-context clinical rules to abundance tables.
#[derive(Debug, Clone)]
pub struct ClinicalFilter {
    contexts: HashMap<String, CompiledContext>,
    relevance: RelevanceLists,
}

impl ClinicalFilter {
    /// Compiles every context's patterns up front.
    pub fn new(
        contexts: &BTreeMap<String, ContextConfig>,
        relevance: RelevanceLists,
    ) -> Result<Self, FilterError> {
        let contexts = contexts
            .iter()
            .map(|(name, config)| Ok((name.clone(), CompiledContext::compile(name, config)?)))
            .collect::<Result<HashMap<_, _>, FilterError>>()?;
        Ok(ClinicalFilter { contexts, relevance })
    }

    pub fn has_context(&self, name: &str) -> bool {
        self.contexts.contains_key(name)
    }

    /// Filters `table` for `database_context`, returning a new table.
    ///
    /// The abundance threshold is checked against each record's percentage
    /// in the input table. Output percentages are recomputed over the
    /// surviving records only.
    pub fn filter(
        &self,
        table: &SampleAbundanceTable,
        database_context: &str,
    ) -> Result<SampleAbundanceTable, FilterError> {
        let context = self
            .contexts
            .get(database_context)
            .ok_or_else(|| FilterError::UnknownContext(database_context.to_string()))?;

        let mut excluded = 0usize;
        let mut below_threshold = 0usize;
        let mut kept = Vec::with_capacity(table.len());

        for record in table.records() {
            let relevance = context.screen(record, &self.relevance);
            match relevance {
                ClinicalRelevance::Excluded => {
                    debug!("Excluded '{}' ({})", record.species, record.kingdom);
                    excluded += 1;
                }
                ClinicalRelevance::Low if record.percentage < context.min_abundance => {
                    below_threshold += 1;
                }
                _ => {
                    let mut record = record.clone();
                    record.relevance = Some(relevance);
                    kept.push(record);
                }
            }
        }

        let filtered = table.with_records(kept);
        info!(
            "Sample '{}' [{}]: {} -> {} species ({} excluded, {} below {}%)",
            table.sample_id(),
            database_context,
            table.len(),
            filtered.len(),
            excluded,
            below_threshold,
            context.min_abundance
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::taxonomy::TaxonomyMapper;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn record(species: &str, reads: u64, kingdom: &str) -> AbundanceRecord {
        AbundanceRecord::from_name(species, reads, Some(kingdom), &TaxonomyMapper::new())
    }

    fn default_filter() -> ClinicalFilter {
        ClinicalFilter::new(&default_contexts(), RelevanceLists::default()).unwrap()
    }

    #[test]
    fn test_human_reads_excluded_from_bacterial_context() {
        let table = SampleAbundanceTable::new(
            "barcode01",
            vec![
                record("Homo sapiens", 450, "Eukaryota"),
                record("Bacteroides ovatus", 300, "Bacteria"),
                record("Escherichia coli", 250, "Bacteria"),
            ],
            0,
            1000,
        );
        let filtered = default_filter().filter(&table, "bacteria").unwrap();
        assert!(filtered.records().iter().all(|r| r.species != "Homo sapiens"));
        assert_eq!(filtered.len(), 2);
        assert_relative_eq!(filtered.records()[0].percentage, 300.0 / 550.0 * 100.0);
        assert_relative_eq!(filtered.percentage_sum(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_relevance_tags() {
        let lists = RelevanceLists::default();
        assert_eq!(lists.classify("Salmonella enterica", "Salmonella"), ClinicalRelevance::High);
        assert_eq!(lists.classify("Escherichia coli", "Escherichia"), ClinicalRelevance::Moderate);
        assert_eq!(lists.classify("Escherichia fergusonii", "Escherichia"), ClinicalRelevance::Low);
        assert_eq!(lists.classify("Faecalibacterium prausnitzii", "Faecalibacterium"), ClinicalRelevance::Low);
    }

    #[test]
    fn test_first_list_wins() {
        let lists = RelevanceLists {
            high: vec!["Klebsiella pneumoniae".to_string()],
            moderate: vec!["Klebsiella".to_string()],
        };
        assert_eq!(lists.classify("Klebsiella pneumoniae", "Klebsiella"), ClinicalRelevance::High);
        assert_eq!(lists.classify("Klebsiella oxytoca", "Klebsiella"), ClinicalRelevance::Moderate);
    }

    #[test]
    fn test_relevance_entries_are_curated() {
        let mapper = TaxonomyMapper::new();
        let lists = RelevanceLists::default();
        for name in lists.high.iter().chain(lists.moderate.iter()) {
            assert!(mapper.lookup(name).is_some(), "{} has no curated phylum", name);
        }
    }

    #[test]
    fn test_low_abundance_threshold_spares_pathogens() {
        let table = SampleAbundanceTable::new(
            "s",
            vec![
                record("Bacteroides ovatus", 99_980, "Bacteria"),
                record("Salmonella enterica", 10, "Bacteria"),
                record("Faecalibacterium prausnitzii", 10, "Bacteria"),
            ],
            0,
            100_000,
        );
        let filtered = default_filter().filter(&table, "bacteria").unwrap();
        let names: Vec<&str> = filtered.records().iter().map(|r| r.species.as_str()).collect();
        assert_eq!(names, vec!["Bacteroides ovatus", "Salmonella enterica"]);
        assert_eq!(filtered.records()[1].relevance, Some(ClinicalRelevance::High));
        assert_eq!(filtered.records()[0].relevance, Some(ClinicalRelevance::Low));
    }

    #[test]
    fn test_parasite_context_patterns() {
        let table = SampleAbundanceTable::new(
            "s",
            vec![
                record("Giardia intestinalis", 50, "Eukaryota"),
                record("Phytophthora infestans", 30, "Eukaryota"),
                record("Saccharomyces cerevisiae", 15, "Eukaryota"),
                record("Escherichia coli", 500, "Bacteria"),
                record("Blastocystis hominis", 5, "Eukaryota"),
            ],
            0,
            600,
        );
        let filtered = default_filter().filter(&table, "parasites").unwrap();
        let names: Vec<&str> = filtered.records().iter().map(|r| r.species.as_str()).collect();
        assert_eq!(names, vec!["Giardia intestinalis", "Blastocystis hominis"]);
    }

    #[test]
    fn test_exclude_patterns_are_case_insensitive() {
        let table = SampleAbundanceTable::new(
            "s",
            vec![
                record("Escherichia PHAGE T4", 10, "Bacteria"),
                record("Escherichia coli", 10, "Bacteria"),
            ],
            0,
            20,
        );
        let filtered = default_filter().filter(&table, "bacteria").unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_input_table_untouched() {
        let table = SampleAbundanceTable::new(
            "s",
            vec![record("Homo sapiens", 10, "Eukaryota"), record("Escherichia coli", 10, "Bacteria")],
            0,
            20,
        );
        let before = table.clone();
        let _ = default_filter().filter(&table, "bacteria").unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn test_unknown_context_and_bad_pattern() {
        let filter = default_filter();
        let table = SampleAbundanceTable::new("s", vec![record("Escherichia coli", 1, "Bacteria")], 0, 1);
        assert!(matches!(filter.filter(&table, "viruses"), Err(FilterError::UnknownContext(_))));

        let mut contexts = default_contexts();
        contexts.insert(
            "broken".to_string(),
            ContextConfig {
                exclude_patterns: vec!["(unclosed".to_string()],
                ..ContextConfig::default()
            },
        );
        assert!(matches!(
            ClinicalFilter::new(&contexts, RelevanceLists::default()),
            Err(FilterError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_everything_filtered_gives_empty_table() {
        let table = SampleAbundanceTable::new("s", vec![record("Homo sapiens", 100, "Eukaryota")], 0, 100);
        let filtered = default_filter().filter(&table, "bacteria").unwrap();
        assert!(filtered.is_empty());
        assert_eq!(filtered.total_reads(), 100);
    }

    const NAMES: &[(&str, &str)] = &[
        ("Homo sapiens", "Eukaryota"),
        ("Escherichia coli", "Bacteria"),
        ("Salmonella enterica", "Bacteria"),
        ("Bacteroides ovatus", "Bacteria"),
        ("Faecalibacterium prausnitzii", "Bacteria"),
        ("Klebsiella pneumoniae", "Bacteria"),
        ("Giardia intestinalis", "Eukaryota"),
        ("Ralstonia pickettii", "Bacteria"),
        ("Methanobrevibacter smithii", "Archaea"),
        ("Clostridioides difficile", "Bacteria"),
    ];

    fn arb_table() -> impl Strategy<Value = SampleAbundanceTable> {
        prop::collection::vec((0..NAMES.len(), 1u64..100_000), 1..10).prop_map(|rows| {
            let records = rows
                .into_iter()
                .map(|(i, reads)| record(NAMES[i].0, reads, NAMES[i].1))
                .collect();
            SampleAbundanceTable::new("prop", records, 0, 0)
        })
    }

    proptest! {
        #[test]
        fn prop_percentages_sum_to_100(table in arb_table(), ctx in prop::sample::select(vec!["bacteria", "parasites", "standard"])) {
            prop_assert!((table.percentage_sum() - 100.0).abs() <= 0.5);
            let filtered = default_filter().filter(&table, ctx).unwrap();
            if !filtered.is_empty() {
                prop_assert!((filtered.percentage_sum() - 100.0).abs() <= 0.5);
            }
        }

        #[test]
        fn prop_filter_never_grows_and_drops_excluded(table in arb_table()) {
            let filtered = default_filter().filter(&table, "bacteria").unwrap();
            prop_assert!(filtered.len() <= table.len());
            for r in filtered.records() {
                prop_assert_eq!(r.kingdom.as_str(), "Bacteria");
                prop_assert!(r.species != "Homo sapiens");
                prop_assert!(!r.species.starts_with("Ralstonia"));
            }
        }

        #[test]
        fn prop_high_and_moderate_survive_threshold(table in arb_table()) {
            let filtered = default_filter().filter(&table, "bacteria").unwrap();
            let lists = RelevanceLists::default();
            for r in table.records().iter().filter(|r| r.kingdom == "Bacteria" && !r.species.starts_with("Ralstonia")) {
                let tag = lists.classify(&r.species, &r.genus);
                if tag != ClinicalRelevance::Low {
                    prop_assert!(filtered.records().iter().any(|f| f.species == r.species && f.relevance == Some(tag)));
                }
            }
            for r in filtered.records() {
                prop_assert!(r.relevance.is_some());
                prop_assert!(r.relevance != Some(ClinicalRelevance::Excluded));
            }
        }
    }
}
