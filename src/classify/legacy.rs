//! Adapter for the legacy classification pipeline.
//!
//! The legacy pipeline is an external command that writes a flat abundance
//! table (CSV or TSV with a header row). Its argv comes from configuration;
//! these placeholders are substituted:
//!
//! - `{input}` as a whole argument expands to every input file
//! - `{output}` is the table path the command must write
//! - `{sample}` is the sample id
//! - `{db}` is the context's database path
//!
//! Recognised columns: `species`, `read_count` (or `reads`/`count`) or
//! `percentage` (or `abundance`), and optionally `genus`, `phylum`,
//! `kingdom`. Counts win when both are present; a percentage-only table is
//! scaled to [`PERCENTAGE_SCALE_READS`] pseudo-reads. A row named
//! `unclassified` counts toward the unclassified reads.

use super::process::{run_with_timeout, scratch_tempdir};
use super::{ClassificationRequest, ClassificationSource, ClassifyError};
use crate::abundance::{AbundanceRecord, SampleAbundanceTable};
use crate::bio::taxonomy::{infer_kingdom, normalize_phylum, TaxonomyMapper};
use crate::io::fastq::resolve_inputs;
use crate::io::kraken_report::ReportParseError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

const PROGRAM: &str = "legacy pipeline";

/// Pseudo-read total that 100% maps to when a table has no counts.
pub const PERCENTAGE_SCALE_READS: f64 = 1_000_000.0;

const COUNT_COLUMNS: &[&str] = &["read_count", "reads", "count"];
const PERCENTAGE_COLUMNS: &[&str] = &["percentage", "abundance"];

/// `[fallback]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Program and arguments; empty disables the fallback.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        FallbackConfig {
            command: Vec::new(),
            timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyRow {
    species: String,
    #[serde(alias = "reads", alias = "count")]
    read_count: Option<u64>,
    #[serde(alias = "abundance")]
    percentage: Option<f64>,
    genus: Option<String>,
    phylum: Option<String>,
    kingdom: Option<String>,
}

pub struct LegacyPipeline {
    config: FallbackConfig,
    mapper: Arc<TaxonomyMapper>,
    scratch_dir: Option<PathBuf>,
}

impl LegacyPipeline {
    pub fn new(config: FallbackConfig, mapper: Arc<TaxonomyMapper>) -> Self {
        LegacyPipeline {
            config,
            mapper,
            scratch_dir: None,
        }
    }

    /// Parent for per-run scratch directories; system temp dir when `None`.
    pub fn with_scratch_dir(mut self, scratch_dir: Option<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }

    fn build_command(
        &self,
        request: &ClassificationRequest,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<Command, ClassifyError> {
        let (program, args) = self.config.command.split_first().ok_or_else(|| {
            ClassifyError::Execution {
                program: PROGRAM.to_string(),
                detail: "no fallback command configured".to_string(),
            }
        })?;

        let output = output.to_string_lossy();
        let db = request.db_path.to_string_lossy();
        let mut command = Command::new(program);
        for arg in args {
            if arg == "{input}" {
                command.args(inputs);
            } else {
                command.arg(
                    arg.replace("{output}", &output)
                        .replace("{sample}", &request.sample_id)
                        .replace("{db}", &db),
                );
            }
        }
        Ok(command)
    }

    /// Reads a legacy abundance table.
    pub fn read_table(&self, path: &Path, sample_id: &str) -> Result<SampleAbundanceTable, ReportParseError> {
        let invalid = |reason: String| ReportParseError::Table {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|source| ReportParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let header = content.lines().next().unwrap_or_default();
        if header.trim().is_empty() {
            return Err(ReportParseError::Empty(path.to_path_buf()));
        }
        let delimiter = if header.contains('\t') { b'\t' } else { b',' };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader.headers().map_err(|e| invalid(e.to_string()))?;
        let has_column = |names: &[&str]| headers.iter().any(|h| names.contains(&h));
        let use_counts = has_column(COUNT_COLUMNS);
        if !use_counts && !has_column(PERCENTAGE_COLUMNS) {
            return Err(invalid("needs a read_count or percentage column".to_string()));
        }
        if !use_counts {
            debug!("{} has no read counts; scaling percentages", path.display());
        }

        let mut records = Vec::new();
        let mut unclassified = 0u64;
        for (i, row) in reader.deserialize::<LegacyRow>().enumerate() {
            let row = row.map_err(|e| invalid(e.to_string()))?;
            let reads = row_reads(&row, use_counts)
                .map_err(|reason| invalid(format!("row {}: {}", i + 2, reason)))?;
            if row.species.eq_ignore_ascii_case("unclassified") {
                unclassified += reads;
                continue;
            }
            let mut record =
                AbundanceRecord::from_name(&row.species, reads, row.kingdom.as_deref(), &self.mapper);
            if let Some(genus) = row.genus.filter(|g| !g.is_empty()) {
                record.genus = genus;
            }
            if let Some(phylum) = row.phylum.filter(|p| !p.is_empty()) {
                record.phylum = normalize_phylum(&phylum);
                if row.kingdom.is_none() {
                    record.kingdom = infer_kingdom(&record.phylum).to_string();
                }
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(invalid("no species rows".to_string()));
        }
        let classified: u64 = records.iter().map(|r| r.read_count).sum();
        Ok(SampleAbundanceTable::new(
            sample_id,
            records,
            unclassified,
            classified + unclassified,
        ))
    }
}

/// Read count of a row: the count column, or the percentage scaled to
/// [`PERCENTAGE_SCALE_READS`].
fn row_reads(row: &LegacyRow, use_counts: bool) -> Result<u64, String> {
    if use_counts {
        return row
            .read_count
            .ok_or_else(|| format!("'{}' has no read count", row.species));
    }
    match row.percentage {
        Some(pct) if pct.is_finite() && (0.0..=100.0).contains(&pct) => {
            Ok((pct / 100.0 * PERCENTAGE_SCALE_READS).round() as u64)
        }
        Some(pct) => Err(format!("'{}' has percentage {} outside [0, 100]", row.species, pct)),
        None => Err(format!("'{}' has no percentage", row.species)),
    }
}

impl ClassificationSource for LegacyPipeline {
    fn name(&self) -> &str {
        "legacy"
    }

    fn produce(&self, request: &ClassificationRequest) -> Result<SampleAbundanceTable, ClassifyError> {
        let inputs = resolve_inputs(&request.fastq_files)?;
        let scratch = scratch_tempdir(self.scratch_dir.as_deref(), "legacy-")?;
        let output = scratch.path().join("abundance.tsv");
        let mut command = self.build_command(request, &inputs, &output)?;

        info!("Running legacy pipeline for sample '{}'", request.sample_id);
        let elapsed = run_with_timeout(
            &mut command,
            Duration::from_secs(self.config.timeout_secs),
            &request.cancel,
            &scratch.path().join("stderr.txt"),
        )?;
        debug!("Legacy pipeline took {:.1}s", elapsed.as_secs_f64());

        Ok(self.read_table(&output, &request.sample_id)?)
    }
}
