use crate::abundance::{PhylumDistribution, SampleAbundanceTable};
use crate::bio::taxonomy::TaxonomyMapper;
use crate::classify::{
    ClassificationRequest, ClassificationSourceKind, ClassifyError, FallbackManager,
    KrakenClassifier, LegacyPipeline,
};
use crate::clinical::{ClinicalFilter, DysbiosisResult, DysbiosisScorer, FilterError};
use crate::config::Config;
use crate::utils::{CancellationToken, ParallelConfig, ParallelError, ParallelExecutor};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Error text for samples skipped by a cancelled batch.
pub const CANCELLED_BEFORE_START: &str = "batch cancelled before sample started";

// --- Error Type ---
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error(transparent)]
    Classification(#[from] ClassifyError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Worker pool error: {0}")]
    Parallel(#[from] ParallelError),

    #[error("Unknown database context '{0}'")]
    UnknownContext(String),

    #[error("Sample processing panicked: {0}")]
    Panicked(String),
}

// --- Structs ---

/// One sample to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub sample_id: String,
    /// Read files or barcode directories.
    pub fastq_files: Vec<PathBuf>,
    /// Context name; the configured default when `None`.
    pub database_context: Option<String>,
}

impl SampleSpec {
    pub fn new(sample_id: impl Into<String>, fastq_files: Vec<PathBuf>) -> Self {
        SampleSpec {
            sample_id: sample_id.into(),
            fastq_files,
            database_context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.database_context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    Success,
    Failed,
}

impl SampleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOutcome::Success => "success",
            SampleOutcome::Failed => "failed",
        }
    }
}

/// Per-sample result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    pub sample_id: String,
    pub outcome: SampleOutcome,
    /// Why the sample failed.
    pub error: Option<String>,
    pub database_context: String,
    /// Which classifier produced the table.
    pub source: Option<ClassificationSourceKind>,
    /// Whether the classification passed quality checks.
    pub quality_ok: Option<bool>,
    /// Why the primary classifier was not used, when it was not.
    pub classification_note: Option<String>,
    pub species_before_filter: usize,
    /// Filtered table.
    pub table: Option<SampleAbundanceTable>,
    pub phylum_distribution: Option<PhylumDistribution>,
    pub dysbiosis: Option<DysbiosisResult>,
    pub processing_time_seconds: f64,
}

impl SampleResult {
    pub fn failed(sample_id: &str, database_context: &str, error: impl ToString) -> Self {
        SampleResult {
            sample_id: sample_id.to_string(),
            outcome: SampleOutcome::Failed,
            error: Some(error.to_string()),
            database_context: database_context.to_string(),
            source: None,
            quality_ok: None,
            classification_note: None,
            species_before_filter: 0,
            table: None,
            phylum_distribution: None,
            dysbiosis: None,
            processing_time_seconds: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SampleOutcome::Success
    }

    pub fn species_after_filter(&self) -> usize {
        self.table.as_ref().map_or(0, |t| t.len())
    }
}

// --- Pipeline ---

/// Runs classification, filtering and scoring for batches of samples.
pub struct SampleProcessor {
    manager: FallbackManager,
    filter: ClinicalFilter,
    scorer: DysbiosisScorer,
    /// Context name to reference database.
    databases: BTreeMap<String, PathBuf>,
    default_context: String,
    confidence: f64,
    executor: ParallelExecutor,
    cancel: CancellationToken,
}

impl SampleProcessor {
    /// Builds the full pipeline from configuration: Kraken2 as primary
    /// source, the legacy pipeline as fallback.
    pub fn from_config(config: &Config) -> Result<Self, ProcessingError> {
        info!("Initializing SampleProcessor...");
        let mapper = Arc::new(TaxonomyMapper::new().with_entries(&config.taxonomy.phyla));
        let manager = FallbackManager::new(
            Box::new(KrakenClassifier::new(config.classifier.clone(), Arc::clone(&mapper))),
            Box::new(
                LegacyPipeline::new(config.fallback.clone(), mapper)
                    .with_scratch_dir(config.classifier.scratch_dir.clone()),
            ),
            config.quality.clone(),
        );
        let filter = ClinicalFilter::new(&config.contexts, config.relevance.clone())?;
        let databases = config
            .contexts
            .iter()
            .map(|(name, ctx)| (name.clone(), ctx.database.clone()))
            .collect();

        Self::new(
            manager,
            filter,
            DysbiosisScorer::new(config.dysbiosis.clone()),
            databases,
            &config.pipeline.default_context,
            config.classifier.confidence,
            config.pipeline.workers,
        )
    }

    pub fn new(
        manager: FallbackManager,
        filter: ClinicalFilter,
        scorer: DysbiosisScorer,
        databases: BTreeMap<String, PathBuf>,
        default_context: &str,
        confidence: f64,
        workers: usize,
    ) -> Result<Self, ProcessingError> {
        if !databases.contains_key(default_context) {
            return Err(ProcessingError::UnknownContext(default_context.to_string()));
        }
        let executor = ParallelExecutor::new(Some(ParallelConfig { threads: workers }))?;
        info!(
            "Pipeline ready: {} context(s), default '{}', {} worker(s)",
            databases.len(),
            default_context,
            workers
        );
        Ok(SampleProcessor {
            manager,
            filter,
            scorer,
            databases,
            default_context: default_context.to_string(),
            confidence,
            executor,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that aborts the running batch when cancelled. Samples already
    /// finished keep their results.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn context_for<'a>(&'a self, spec: &'a SampleSpec) -> &'a str {
        spec.database_context
            .as_deref()
            .unwrap_or(&self.default_context)
    }

    /// Runs classification, filtering and scoring for one sample.
    pub fn process_sample(&self, spec: &SampleSpec) -> Result<SampleResult, ProcessingError> {
        let start_time = Instant::now();
        let context = self.context_for(spec);
        info!("Starting processing for sample '{}' [{}]", spec.sample_id, context);

        let db_path = self
            .databases
            .get(context)
            .ok_or_else(|| ProcessingError::UnknownContext(context.to_string()))?;

        let request = ClassificationRequest::new(
            spec.sample_id.clone(),
            spec.fastq_files.clone(),
            db_path.clone(),
            self.confidence,
        )
        .with_cancel(self.cancel.clone());

        let outcome = self.manager.classify_with_fallback(&request)?;
        let mut result = self.interpret(&outcome.table, context)?;
        result.source = Some(outcome.source);
        result.quality_ok = Some(outcome.quality_ok);
        result.classification_note = outcome.error;
        result.processing_time_seconds = start_time.elapsed().as_secs_f64();

        info!(
            "Sample '{}' finished in {:.2} seconds (source {}, quality {})",
            spec.sample_id,
            result.processing_time_seconds,
            outcome.source.as_str(),
            if outcome.quality_ok { "ok" } else { "LOW" }
        );
        Ok(result)
    }

    /// Filters and scores an existing table, skipping classification.
    pub fn interpret(
        &self,
        table: &SampleAbundanceTable,
        context: &str,
    ) -> Result<SampleResult, ProcessingError> {
        let filtered = self.filter.filter(table, context)?;
        let dysbiosis = self.scorer.score(&filtered);
        if dysbiosis.is_insufficient() {
            warn!(
                "Sample '{}': no scorable species left after filtering",
                table.sample_id()
            );
        }

        Ok(SampleResult {
            sample_id: table.sample_id().to_string(),
            outcome: SampleOutcome::Success,
            error: None,
            database_context: context.to_string(),
            source: None,
            quality_ok: None,
            classification_note: None,
            species_before_filter: table.len(),
            phylum_distribution: Some(filtered.phylum_distribution()),
            table: Some(filtered),
            dysbiosis: Some(dysbiosis),
            processing_time_seconds: 0.0,
        })
    }

    /// Processes every sample, isolating failures.
    ///
    /// Always returns one result per input sample, in input order. A sample
    /// that errors or panics gets `outcome = failed`; the rest of the batch
    /// continues. After cancellation, samples not yet started are reported
    /// as failed.
    pub fn process_batch(&self, samples: &[SampleSpec]) -> Vec<SampleResult> {
        self.process_batch_with(samples, |_| {})
    }

    /// Like [`process_batch`](Self::process_batch), calling `on_result` once
    /// per sample as soon as its result exists, from the worker thread that
    /// produced it. Results of completed samples are therefore handed out
    /// even if the batch is later cancelled.
    pub fn process_batch_with<F>(&self, samples: &[SampleSpec], on_result: F) -> Vec<SampleResult>
    where
        F: Fn(&SampleResult) + Send + Sync,
    {
        info!(
            "=== Processing {} sample(s) with {} worker(s) ===",
            samples.len(),
            self.executor.threads()
        );

        let results = self.executor.execute(samples, |spec| {
            let result = if self.cancel.is_cancelled() {
                SampleResult::failed(&spec.sample_id, self.context_for(spec), CANCELLED_BEFORE_START)
            } else {
                match self.process_sample(spec) {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Sample '{}' failed: {}", spec.sample_id, e);
                        SampleResult::failed(&spec.sample_id, self.context_for(spec), e)
                    }
                }
            };
            on_result(&result);
            result
        });

        let results: Vec<SampleResult> = samples
            .iter()
            .zip(results)
            .map(|(spec, result)| {
                result.unwrap_or_else(|panic| {
                    let failed = SampleResult::failed(
                        &spec.sample_id,
                        self.context_for(spec),
                        ProcessingError::Panicked(panic),
                    );
                    on_result(&failed);
                    failed
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            "=== Batch finished: {} succeeded, {} failed ===",
            succeeded,
            results.len() - succeeded
        );
        results
    }
}
