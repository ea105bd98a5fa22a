//! Sample sheet handling.
//!
//! A batch is described either by a CSV sample sheet or by a directory of
//! per-barcode sub-directories, as written by nanopore basecallers.

use super::processor::SampleSpec;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Barcode directories that never hold a real sample.
const SKIPPED_BARCODE_DIRS: &[&str] = &["unclassified", "mixed"];

#[derive(Error, Debug)]
pub enum SampleSheetError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in sample sheet: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sample sheet is missing a '{0}' column")]
    MissingColumn(&'static str),

    #[error("Sample sheet row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("Duplicate sample id '{0}'")]
    DuplicateSample(String),

    #[error("No samples found in {0}")]
    NoSamples(PathBuf),
}

/// Loads samples from a CSV sample sheet.
///
/// # Arguments
///
/// * `path` - Path to the sample sheet. Required columns are `sample_id`
///   (or `sample`/`barcode`) and `fastq` (or `fastq_files`/`reads`/`path`),
///   the latter holding `;`-separated files or a directory. An optional
///   `context` (or `database_context`) column selects the database context.
///   Relative paths are resolved against the sheet's directory.
///
/// # Returns
///
/// * `Result<Vec<SampleSpec>, SampleSheetError>` - Samples in file order.
pub fn load_sample_sheet(path: impl AsRef<Path>) -> Result<Vec<SampleSpec>, SampleSheetError> {
    let path = path.as_ref();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    // Find column indices for required fields
    let headers = rdr.headers()?.clone();
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let sample_col = find(&["sample_id", "sampleid", "sample", "barcode"])
        .ok_or(SampleSheetError::MissingColumn("sample_id"))?;
    let fastq_col = find(&["fastq", "fastq_files", "reads", "path"])
        .ok_or(SampleSheetError::MissingColumn("fastq"))?;
    let context_col = find(&["context", "database_context"]);

    let mut samples = Vec::new();
    let mut seen = HashSet::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let row = i + 2; // header is row 1
        let sample_id = record.get(sample_col).unwrap_or_default();
        if sample_id.is_empty() {
            warn!("Skipping sample sheet row {} with empty sample id.", row);
            continue;
        }

        let fastq_files: Vec<PathBuf> = record
            .get(fastq_col)
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| resolve(base_dir, p))
            .collect();
        if fastq_files.is_empty() {
            return Err(SampleSheetError::InvalidRow {
                row,
                reason: format!("sample '{}' lists no input files", sample_id),
            });
        }

        if !seen.insert(sample_id.to_string()) {
            return Err(SampleSheetError::DuplicateSample(sample_id.to_string()));
        }

        let mut spec = SampleSpec::new(sample_id, fastq_files);
        if let Some(context) = context_col
            .and_then(|c| record.get(c))
            .filter(|c| !c.is_empty())
        {
            spec = spec.with_context(context);
        }
        debug!("Sample '{}': {} input(s)", spec.sample_id, spec.fastq_files.len());
        samples.push(spec);
    }

    if samples.is_empty() {
        return Err(SampleSheetError::NoSamples(path.to_path_buf()));
    }
    info!("Loaded {} sample(s) from {}", samples.len(), path.display());
    Ok(samples)
}

fn resolve(base_dir: &Path, entry: &str) -> PathBuf {
    let p = PathBuf::from(entry);
    if p.is_absolute() {
        p
    } else {
        base_dir.join(p)
    }
}

/// Builds one sample per sub-directory of `dir` (e.g. `barcode01/`).
///
/// Directories named `unclassified` or `mixed` are skipped. Every sample
/// gets `context` when given.
pub fn discover_barcode_dirs(
    dir: impl AsRef<Path>,
    context: Option<&str>,
) -> Result<Vec<SampleSpec>, SampleSheetError> {
    let dir = dir.as_ref();
    let io_err = |source| SampleSheetError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut samples = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if SKIPPED_BARCODE_DIRS.contains(&name.to_lowercase().as_str()) {
            debug!("Skipping {}", path.display());
            continue;
        }
        let mut spec = SampleSpec::new(name, vec![path]);
        if let Some(c) = context {
            spec = spec.with_context(c);
        }
        samples.push(spec);
    }

    if samples.is_empty() {
        return Err(SampleSheetError::NoSamples(dir.to_path_buf()));
    }
    samples.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
    info!("Found {} barcode directories in {}", samples.len(), dir.display());
    Ok(samples)
}
