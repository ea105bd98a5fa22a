//! Plain-text summaries of sample results.

use super::processor::SampleResult;
use itertools::Itertools;

/// Species listed per sample in the detailed report.
const TOP_SPECIES: usize = 10;

/// Builds the detailed report for one sample.
pub fn generate_report(result: &SampleResult) -> String {
    let mut report = String::new();

    // Header
    report.push_str(&format!("Dysbiosis Report for Sample: {}\n", result.sample_id));
    report.push_str("=================================================\n\n");

    if !result.is_success() {
        report.push_str(&format!(
            "FAILED: {}\n",
            result.error.as_deref().unwrap_or("unknown error")
        ));
        return report;
    }

    // Classification Section
    report.push_str("Classification:\n");
    report.push_str(&format!("  Context: {}\n", result.database_context));
    report.push_str(&format!("  Source: {}\n", source_label(result)));
    report.push_str(&format!("  Quality checks: {}\n", quality_label(result)));
    if let Some(note) = &result.classification_note {
        report.push_str(&format!("  Note: {}\n", note));
    }
    report.push_str(&format!(
        "  Species: {} reported, {} after clinical filtering\n\n",
        result.species_before_filter,
        result.species_after_filter()
    ));

    // Species Section
    if let Some(table) = result.table.as_ref().filter(|t| !t.is_empty()) {
        report.push_str("Top Species:\n");
        let mut records: Vec<_> = table.records().iter().collect();
        records.sort_by(|a, b| {
            b.percentage
                .partial_cmp(&a.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for record in records.into_iter().take(TOP_SPECIES) {
            report.push_str(&format!(
                "  - {:<40} {:>6.2}%  {:<16} {}\n",
                record.species,
                record.percentage,
                record.phylum,
                record.relevance.map_or("", |r| r.as_str())
            ));
        }
        report.push('\n');
    } else {
        report.push_str("Top Species: none passed clinical filtering.\n\n");
    }

    // Phylum Section
    if let Some(dist) = result.phylum_distribution.as_ref().filter(|d| !d.is_empty()) {
        report.push_str("Phylum Distribution:\n");
        for (phylum, pct) in dist.iter() {
            report.push_str(&format!("  {:<24} {:>6.2}%\n", phylum, pct));
        }
        report.push('\n');
    }

    // Dysbiosis Section
    if let Some(d) = &result.dysbiosis {
        report.push_str(&format!(
            "Dysbiosis Index: {:.2} ({})\n",
            d.index,
            d.category.as_str()
        ));
        for dev in d.deviations.iter().filter(|dev| dev.deviation > 0.0) {
            report.push_str(&format!(
                "  {} at {:.2}% is outside [{:.1}, {:.1}] by {:.2}\n",
                dev.phylum, dev.observed, dev.low, dev.high, dev.deviation
            ));
        }
    }

    report
}

/// One line per sample, always naming the classification source and
/// quality status.
pub fn generate_batch_summary(results: &[SampleResult]) -> String {
    let mut report = String::new();
    let succeeded = results.iter().filter(|r| r.is_success()).count();

    report.push_str("Batch Summary\n");
    report.push_str("=================================================\n");
    report.push_str(&format!(
        "{} sample(s): {} succeeded, {} failed\n\n",
        results.len(),
        succeeded,
        results.len() - succeeded
    ));

    for result in results {
        if result.is_success() {
            let dysbiosis = result.dysbiosis.as_ref().map_or_else(
                || "n/a".to_string(),
                |d| format!("{:.2} ({})", d.index, d.category.as_str()),
            );
            report.push_str(&format!(
                "  {:<16} source={:<8} quality={:<4} species={:>3}/{:<3} dysbiosis={}\n",
                result.sample_id,
                source_label(result),
                quality_label(result),
                result.species_after_filter(),
                result.species_before_filter,
                dysbiosis
            ));
        } else {
            report.push_str(&format!(
                "  {:<16} FAILED: {}\n",
                result.sample_id,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    let flagged = results
        .iter()
        .filter(|r| r.is_success() && r.quality_ok == Some(false))
        .map(|r| r.sample_id.as_str())
        .join(", ");
    if !flagged.is_empty() {
        report.push_str(&format!(
            "\nLow-confidence results (failed quality checks): {}\n",
            flagged
        ));
    }

    report
}

fn source_label(result: &SampleResult) -> &'static str {
    result.source.map_or("n/a", |s| s.as_str())
}

fn quality_label(result: &SampleResult) -> &'static str {
    match result.quality_ok {
        Some(true) => "ok",
        Some(false) => "LOW",
        None => "n/a",
    }
}
