use crate::bio::taxonomy::TaxonomyMapper;
use crate::config::Config;
use crate::io::kraken_report::ReportParser;
use crate::io::{write_batch_summary, write_sample_result, BATCH_SUMMARY_FILE};
use crate::pipeline::{
    discover_barcode_dirs, generate_batch_summary, generate_report, load_sample_sheet,
    SampleProcessor,
};
use crate::utils::CancellationToken;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Clinical dysbiosis profiling from taxonomic classification", long_about = None)]
pub struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Samples processed concurrently (overrides pipeline.workers)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify, filter and score a batch of samples
    Run {
        /// CSV sample sheet with sample_id, fastq and optional context columns
        #[arg(short, long, conflicts_with = "barcode_dir", required_unless_present = "barcode_dir")]
        samples: Option<PathBuf>,

        /// Directory holding one sub-directory of reads per barcode
        #[arg(short, long)]
        barcode_dir: Option<PathBuf>,

        /// Database context for samples that do not name one
        #[arg(long)]
        context: Option<String>,

        /// Path to the output directory (overrides pipeline.output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Filter and score an existing Kraken2 report without re-classifying
    Report {
        /// Path to the classifier report
        report: PathBuf,

        /// Sample ID; defaults to the report's file stem
        #[arg(short, long)]
        sample_id: Option<String>,

        /// Database context whose filter rules apply
        #[arg(long)]
        context: Option<String>,

        /// Directory for the JSON result; printed only when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.pipeline.workers = workers;
    }

    match cli.command {
        Commands::Run {
            samples,
            barcode_dir,
            context,
            output,
        } => {
            if let Some(context) = context {
                config.pipeline.default_context = context;
            }
            if let Some(output) = output {
                config.pipeline.output_dir = output;
            }
            config.validate()?;

            let specs = match (samples, barcode_dir) {
                (Some(sheet), _) => load_sample_sheet(&sheet)?,
                (None, Some(dir)) => discover_barcode_dirs(&dir, None)?,
                (None, None) => bail!("either --samples or --barcode-dir is required"),
            };

            let processor = SampleProcessor::from_config(&config)?;
            install_interrupt_handler(processor.cancellation_token())?;

            // Each result is written as soon as its sample finishes, so an
            // interrupted batch keeps everything completed so far.
            let output_dir = &config.pipeline.output_dir;
            let results = processor.process_batch_with(&specs, |result| {
                match write_sample_result(result, output_dir) {
                    Ok(path) => info!("Wrote {}", path.display()),
                    Err(e) => error!("Could not write result for '{}': {:#}", result.sample_id, e),
                }
            });

            let summary_path = output_dir.join(BATCH_SUMMARY_FILE);
            write_batch_summary(&results, &summary_path)?;
            info!("Wrote {}", summary_path.display());

            println!("{}", generate_batch_summary(&results));

            if !results.is_empty() && results.iter().all(|r| !r.is_success()) {
                bail!("all {} sample(s) failed", results.len());
            }
            Ok(())
        }

        Commands::Report {
            report,
            sample_id,
            context,
            output,
        } => {
            config.validate()?;
            let sample_id = sample_id.unwrap_or_else(|| default_sample_id(&report));
            let context = context.unwrap_or_else(|| config.pipeline.default_context.clone());

            let mapper = Arc::new(TaxonomyMapper::new().with_entries(&config.taxonomy.phyla));
            let table = ReportParser::new(mapper)
                .parse(&report, &sample_id)
                .with_context(|| format!("Failed to read report {}", report.display()))?;
            let quality = config.quality.assess(&table);
            if !quality.passed {
                warn!("Report for '{}' fails quality checks: {}", sample_id, quality.summary());
            }

            let processor = SampleProcessor::from_config(&config)?;
            let mut result = processor.interpret(&table, &context)?;
            result.quality_ok = Some(quality.passed);

            if let Some(dir) = output {
                let path = write_sample_result(&result, &dir)?;
                info!("Wrote {}", path.display());
            }
            println!("{}", generate_report(&result));
            Ok(())
        }

        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Ctrl-C cancels the batch: running classifiers are killed, samples not
/// yet started are marked failed, and finished results are still written.
/// A second Ctrl-C exits immediately.
fn install_interrupt_handler(token: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            eprintln!("Interrupted again, exiting.");
            std::process::exit(130);
        }
        warn!("Interrupt received; cancelling batch (Ctrl-C again to exit now)");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")
}

/// `barcode01.kreport` and `barcode01.report.txt` both give `barcode01`.
fn default_sample_id(report: &Path) -> String {
    report
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|n| !n.is_empty())
        .unwrap_or("sample")
        .to_string()
}
