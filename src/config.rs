//! Runtime configuration.
//!
//! Everything the pipeline treats as policy (databases, rule tables,
//! thresholds, timeouts) lives in one TOML file. Every section is optional;
//! missing values fall back to the built-in defaults, which carry the
//! curated rule tables, so the tool also runs with no file at all.

use crate::classify::kraken::ClassifierConfig;
use crate::classify::legacy::FallbackConfig;
use crate::classify::QualityThresholds;
use crate::clinical::dysbiosis::DysbiosisConfig;
use crate::clinical::filter::{default_contexts, ClinicalFilter, ContextConfig, RelevanceLists};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Extra name to phylum entries, `[taxonomy.phyla]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    pub phyla: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples processed concurrently.
    pub workers: usize,
    /// Context used when a sample does not name one.
    pub default_context: String,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: num_cpus::get().clamp(1, 4),
            default_context: "bacteria".to_string(),
            output_dir: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub fallback: FallbackConfig,
    pub quality: QualityThresholds,
    pub relevance: RelevanceLists,
    pub dysbiosis: DysbiosisConfig,
    pub contexts: BTreeMap<String, ContextConfig>,
    pub taxonomy: TaxonomyConfig,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            classifier: ClassifierConfig::default(),
            fallback: FallbackConfig::default(),
            quality: QualityThresholds::default(),
            relevance: RelevanceLists::default(),
            dysbiosis: DysbiosisConfig::default(),
            contexts: default_contexts(),
            taxonomy: TaxonomyConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` when given, the built-in defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let c = &self.classifier;
        if !(0.0..=1.0).contains(&c.confidence) {
            return invalid(format!("classifier.confidence {} is outside [0, 1]", c.confidence));
        }
        if c.timeout_secs == 0 {
            return invalid("classifier.timeout_secs must be positive".to_string());
        }
        if c.threads == 0 {
            return invalid("classifier.threads must be positive".to_string());
        }
        if self.fallback.timeout_secs == 0 {
            return invalid("fallback.timeout_secs must be positive".to_string());
        }

        let q = &self.quality;
        if !(0.0..=1.0).contains(&q.max_unclassified_fraction) {
            return invalid(format!(
                "quality.max_unclassified_fraction {} is outside [0, 1]",
                q.max_unclassified_fraction
            ));
        }

        let d = &self.dysbiosis;
        if !is_non_negative(d.normal_below) || !is_non_negative(d.severe_at) {
            return invalid("dysbiosis thresholds must be finite and non-negative".to_string());
        }
        if d.normal_below > d.severe_at {
            return invalid(format!(
                "dysbiosis.normal_below ({}) exceeds dysbiosis.severe_at ({})",
                d.normal_below, d.severe_at
            ));
        }
        for (phylum, range) in &d.reference_ranges {
            if !is_non_negative(range.low) || !is_non_negative(range.high) || range.low > range.high {
                return invalid(format!(
                    "reference range for {} is invalid: [{}, {}]",
                    phylum, range.low, range.high
                ));
            }
            if !is_non_negative(range.weight) {
                return invalid(format!("weight for {} must be finite and non-negative", phylum));
            }
        }

        for (name, context) in &self.contexts {
            if !is_non_negative(context.min_abundance) {
                return invalid(format!("contexts.{}.min_abundance must be finite and non-negative", name));
            }
        }
        if self.pipeline.workers == 0 {
            return invalid("pipeline.workers must be positive".to_string());
        }
        if !self.contexts.contains_key(&self.pipeline.default_context) {
            return invalid(format!(
                "pipeline.default_context '{}' is not a configured context",
                self.pipeline.default_context
            ));
        }

        // Compiling the filter surfaces bad regexes.
        ClinicalFilter::new(&self.contexts, self.relevance.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
