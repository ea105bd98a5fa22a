//! Parser for hierarchical classifier reports.
//!
//! Reads the tab-delimited summary report written by Kraken2 (`--report`)
//! and flattens its species-rank rows into a [`SampleAbundanceTable`].
//!
//! Supported layouts, detected per row:
//!
//! ```text
//! Kraken2            pct  clade  direct  rank  taxid  name
//! Kraken2 minimizer  pct  clade  direct  minimizers  distinct  rank  taxid  name
//! KrakenUniq         pct  reads  taxReads  kmers  dup  cov  taxid  rank  name
//! ```
//!
//! Names are indented by two spaces per tree level. The enclosing domain,
//! phylum and genus rows are tracked so species rows can inherit a kingdom,
//! a second-chance phylum and, for unnamed rows, a `"<Genus> sp."` label.

use crate::abundance::{AbundanceRecord, SampleAbundanceTable};
use crate::bio::taxonomy::{extract_genus, infer_kingdom, normalize_phylum, TaxonomicLevel, TaxonomyMapper, UNKNOWN};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Minimum number of tab-separated fields in a report row.
pub const REPORT_COLUMNS: usize = 6;

#[derive(Error, Debug)]
pub enum ReportParseError {
    #[error("Failed to read report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Report {0} is empty")]
    Empty(PathBuf),

    #[error("Report {path}, line {line}: expected at least {expected} tab-separated fields, found {found}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Report {path}, line {line}: invalid {field} '{value}'")]
    InvalidValue {
        path: PathBuf,
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("Report {0} contains no species-rank rows")]
    NoSpeciesRows(PathBuf),

    #[error("Abundance table {path} is invalid: {reason}")]
    Table { path: PathBuf, reason: String },
}

/// One parsed report row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub percentage: f64,
    /// Reads assigned to this taxon and everything below it.
    pub clade_reads: u64,
    /// Reads assigned to this taxon directly.
    pub direct_reads: u64,
    pub rank_code: String,
    pub level: TaxonomicLevel,
    pub tax_id: String,
    pub name: String,
    /// Tree depth derived from the name's indentation.
    pub depth: usize,
}

/// Ancestor kept on the lineage stack while walking the report.
struct Ancestor {
    depth: usize,
    level: TaxonomicLevel,
    name: String,
}

/// Converts classifier reports into abundance tables.
#[derive(Debug, Clone, Default)]
pub struct ReportParser {
    mapper: Arc<TaxonomyMapper>,
}

impl ReportParser {
    pub fn new(mapper: Arc<TaxonomyMapper>) -> Self {
        ReportParser { mapper }
    }

    /// Parses the report at `report_path` into a table for `sample_id`.
    pub fn parse(
        &self,
        report_path: impl AsRef<Path>,
        sample_id: &str,
    ) -> Result<SampleAbundanceTable, ReportParseError> {
        let path = report_path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ReportParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = self.parse_str(&content, path, sample_id)?;
        info!(
            "Parsed report {} for sample '{}': {} species, {} of {} reads unclassified",
            path.display(),
            sample_id,
            table.len(),
            table.unclassified_reads(),
            table.total_reads()
        );
        Ok(table)
    }

    /// Parses report text. `source` is only used in error messages.
    pub fn parse_str(
        &self,
        content: &str,
        source: &Path,
        sample_id: &str,
    ) -> Result<SampleAbundanceTable, ReportParseError> {
        if content.trim().is_empty() {
            return Err(ReportParseError::Empty(source.to_path_buf()));
        }

        let mut lineage: Vec<Ancestor> = Vec::new();
        let mut records = Vec::new();
        let mut unclassified_reads = 0u64;
        let mut classified_reads = 0u64;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            if is_header(line) {
                continue;
            }
            let row = parse_row(line, line_no, source)?;

            while lineage.last().is_some_and(|a| a.depth >= row.depth) {
                lineage.pop();
            }

            match row.level {
                TaxonomicLevel::Unclassified => unclassified_reads += row.clade_reads,
                TaxonomicLevel::Root => classified_reads += row.clade_reads,
                TaxonomicLevel::Species if row.clade_reads > 0 => {
                    records.push(self.species_record(&row, &lineage));
                }
                _ => {}
            }

            lineage.push(Ancestor {
                depth: row.depth,
                level: row.level,
                name: row.name,
            });
        }

        if records.is_empty() {
            return Err(ReportParseError::NoSpeciesRows(source.to_path_buf()));
        }

        debug!(
            "Sample '{}': {} species rows, {} classified / {} unclassified reads",
            sample_id,
            records.len(),
            classified_reads,
            unclassified_reads
        );

        Ok(SampleAbundanceTable::new(
            sample_id,
            records,
            unclassified_reads,
            classified_reads + unclassified_reads,
        ))
    }

    /// Builds the record for a species row, back-filling ranks from the
    /// curated table first and the report lineage second.
    fn species_record(&self, row: &ReportRow, lineage: &[Ancestor]) -> AbundanceRecord {
        let ancestor = |level: TaxonomicLevel| {
            lineage
                .iter()
                .rev()
                .find(|a| a.level == level)
                .map(|a| a.name.as_str())
        };

        let species = if row.name.is_empty() {
            match ancestor(TaxonomicLevel::Genus) {
                Some(genus) => format!("{} sp.", genus),
                None => UNKNOWN.to_string(),
            }
        } else {
            row.name.clone()
        };

        let phylum = match self.mapper.lookup(&species) {
            Some(phylum) => phylum.to_string(),
            None => ancestor(TaxonomicLevel::Phylum)
                .map(normalize_phylum)
                .unwrap_or_else(|| UNKNOWN.to_string()),
        };
        let kingdom = ancestor(TaxonomicLevel::Domain)
            .map(str::to_string)
            .unwrap_or_else(|| infer_kingdom(&phylum).to_string());

        AbundanceRecord {
            genus: extract_genus(&species),
            species,
            phylum,
            kingdom,
            read_count: row.clade_reads,
            percentage: 0.0,
            relevance: None,
        }
    }
}

/// Parses a report with the built-in taxonomy table.
pub fn parse_report(
    report_path: impl AsRef<Path>,
    sample_id: &str,
) -> Result<SampleAbundanceTable, ReportParseError> {
    ReportParser::default().parse(report_path, sample_id)
}

fn is_header(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('%')
}

/// Parses a single data row.
pub fn parse_row(line: &str, line_no: usize, source: &Path) -> Result<ReportRow, ReportParseError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    let n = fields.len();
    if n < REPORT_COLUMNS {
        return Err(ReportParseError::MalformedRow {
            path: source.to_path_buf(),
            line: line_no,
            expected: REPORT_COLUMNS,
            found: n,
        });
    }

    let invalid = |field: &'static str, value: &str| ReportParseError::InvalidValue {
        path: source.to_path_buf(),
        line: line_no,
        field,
        value: value.to_string(),
    };

    let percentage: f64 = fields[0]
        .trim()
        .parse()
        .map_err(|_| invalid("percentage", fields[0]))?;
    let clade_reads: u64 = fields[1]
        .trim()
        .parse()
        .map_err(|_| invalid("clade read count", fields[1]))?;
    let direct_reads: u64 = fields[2]
        .trim()
        .parse()
        .map_err(|_| invalid("direct read count", fields[2]))?;

    // Kraken2 puts the rank before the taxid, KrakenUniq after it.
    let (rank_code, tax_id) = if fields[n - 3].trim().parse::<u64>().is_ok() {
        (fields[n - 2].trim(), fields[n - 3].trim())
    } else {
        (fields[n - 3].trim(), fields[n - 2].trim())
    };

    let raw_name = fields[n - 1];
    let indent = raw_name.len() - raw_name.trim_start_matches(' ').len();

    Ok(ReportRow {
        percentage,
        clade_reads,
        direct_reads,
        rank_code: rank_code.to_string(),
        level: TaxonomicLevel::from_rank_code(rank_code),
        tax_id: tax_id.to_string(),
        name: raw_name.trim().to_string(),
        depth: indent / 2,
    })
}
