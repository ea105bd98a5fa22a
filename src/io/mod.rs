//! Input/Output operations module.
//!
//! Handles reading classifier output and sequence inputs, and writing
//! per-sample results and batch summaries.

pub mod fastq;
pub mod kraken_report;

use crate::pipeline::SampleResult;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// File name of the per-batch CSV summary.
pub const BATCH_SUMMARY_FILE: &str = "batch_summary.csv";

/// Writes one sample's full result as pretty-printed JSON.
///
/// # Arguments
///
/// * `result` - The sample result to write.
/// * `output_dir` - Directory to write into; created if missing.
///
/// # Returns
///
/// * `Result<PathBuf>` - Path of the written `<sample>_result.json`.
pub fn write_sample_result(result: &SampleResult, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    let path = output_dir.join(format!("{}_result.json", safe_file_stem(&result.sample_id)));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), result)?;
    Ok(path)
}

/// Writes one CSV row per sample.
///
/// Columns: sample_id, outcome, source, quality_ok, species_before_filter,
/// species_after_filter, dysbiosis_index, category, error. Fields that do
/// not apply to a failed sample are left empty.
pub fn write_batch_summary(results: &[SampleResult], output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    writer.write_record([
        "sample_id",
        "outcome",
        "source",
        "quality_ok",
        "species_before_filter",
        "species_after_filter",
        "dysbiosis_index",
        "category",
        "error",
    ])?;

    for result in results {
        let source = result.source.map_or("", |s| s.as_str());
        let quality_ok = result.quality_ok.map_or(String::new(), |q| q.to_string());
        let (before, after) = if result.is_success() {
            (
                result.species_before_filter.to_string(),
                result.species_after_filter().to_string(),
            )
        } else {
            (String::new(), String::new())
        };
        let index = result
            .dysbiosis
            .as_ref()
            .map_or(String::new(), |d| format!("{:.4}", d.index));
        let category = result.dysbiosis.as_ref().map_or("", |d| d.category.as_str());

        writer.write_record([
            result.sample_id.as_str(),
            result.outcome.as_str(),
            source,
            quality_ok.as_str(),
            before.as_str(),
            after.as_str(),
            index.as_str(),
            category,
            result.error.as_deref().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Sample ids become file names; anything outside `[A-Za-z0-9._-]` is
/// replaced with `_`.
fn safe_file_stem(sample_id: &str) -> String {
    let stem: String = sample_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "sample".to_string()
    } else {
        stem
    }
}
