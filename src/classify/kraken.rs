//! Kraken2 adapter.
//!
//! Validates parameters, inputs and the reference database, runs `kraken2`
//! in a private scratch directory with a deadline, and parses the report it
//! writes. The scratch directory is a [`tempfile::TempDir`], so it is
//! removed on every return path, including timeouts and parse failures.

use super::process::{run_with_timeout, scratch_tempdir};
use super::{ClassificationRequest, ClassificationSource, ClassifyError};
use crate::abundance::SampleAbundanceTable;
use crate::bio::taxonomy::TaxonomyMapper;
use crate::io::fastq::{input_compression, resolve_inputs, InputCompression, InputError};
use crate::io::kraken_report::ReportParser;
use crate::utils::CancellationToken;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Settings for the primary classifier, `[classifier]` in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Executable name or path.
    pub binary: PathBuf,
    /// Arguments placed before the generated options.
    pub extra_args: Vec<String>,
    /// Threads per classifier process.
    pub threads: usize,
    /// Default `--confidence`, in [0, 1].
    pub confidence: f64,
    pub timeout_secs: u64,
    /// Files that must exist in a database directory.
    pub required_index_files: Vec<String>,
    /// Parent for per-run scratch directories; system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            binary: PathBuf::from("kraken2"),
            extra_args: Vec::new(),
            threads: num_cpus::get(),
            confidence: 0.0,
            timeout_secs: 3600,
            required_index_files: vec![
                "hash.k2d".to_string(),
                "opts.k2d".to_string(),
                "taxo.k2d".to_string(),
            ],
            scratch_dir: None,
        }
    }
}

pub struct KrakenClassifier {
    config: ClassifierConfig,
    parser: ReportParser,
}

impl KrakenClassifier {
    pub fn new(config: ClassifierConfig, mapper: Arc<TaxonomyMapper>) -> Self {
        KrakenClassifier {
            config,
            parser: ReportParser::new(mapper),
        }
    }

    /// Classifies one sample's reads against `db_path`.
    ///
    /// # Arguments
    ///
    /// * `fastq_files` - Read files or barcode directories.
    /// * `db_path` - Kraken2 database directory.
    /// * `sample_id` - Identifier carried into the table.
    /// * `confidence_threshold` - Kraken2 `--confidence`, in [0, 1].
    ///
    /// # Returns
    ///
    /// * `Result<SampleAbundanceTable, ClassifyError>` - The parsed species
    ///   table, or `Config`, `Input`, `Database`, `ExecutionTimeout`,
    ///   `Execution` or `Parse` errors.
    pub fn classify(
        &self,
        fastq_files: &[PathBuf],
        db_path: &Path,
        sample_id: &str,
        confidence_threshold: f64,
    ) -> Result<SampleAbundanceTable, ClassifyError> {
        self.run(
            fastq_files,
            db_path,
            sample_id,
            confidence_threshold,
            &CancellationToken::new(),
        )
    }

    fn run(
        &self,
        fastq_files: &[PathBuf],
        db_path: &Path,
        sample_id: &str,
        confidence: f64,
        cancel: &CancellationToken,
    ) -> Result<SampleAbundanceTable, ClassifyError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ClassifyError::Config(format!(
                "confidence threshold {} is outside [0, 1]",
                confidence
            )));
        }
        if self.config.timeout_secs == 0 {
            return Err(ClassifyError::Config("timeout must be positive".to_string()));
        }
        let inputs = resolve_inputs(fastq_files)?;
        let compression = check_compression(&inputs)?;
        self.validate_database(db_path)?;

        let scratch = scratch_tempdir(self.config.scratch_dir.as_deref(), &scratch_prefix(sample_id))?;
        let report_path = scratch.path().join("report.txt");
        let output_path = scratch.path().join("classifications.txt");

        let mut command = Command::new(&self.config.binary);
        command
            .args(&self.config.extra_args)
            .arg("--db")
            .arg(db_path)
            .arg("--threads")
            .arg(self.config.threads.max(1).to_string())
            .arg("--confidence")
            .arg(confidence.to_string())
            .arg("--report")
            .arg(&report_path)
            .arg("--output")
            .arg(&output_path);
        if let Some(flag) = compression_flag(compression) {
            command.arg(flag);
        }
        command.args(&inputs);

        info!(
            "Classifying sample '{}' ({} file(s)) against {}",
            sample_id,
            inputs.len(),
            db_path.display()
        );
        let elapsed = run_with_timeout(
            &mut command,
            Duration::from_secs(self.config.timeout_secs),
            cancel,
            &scratch.path().join("stderr.txt"),
        )?;
        debug!("Classifier run took {:.1}s", elapsed.as_secs_f64());

        let table = self.parser.parse(&report_path, sample_id)?;
        Ok(table)
    }

    /// Checks that `db_path` is a directory holding every required index file.
    pub fn validate_database(&self, db_path: &Path) -> Result<(), ClassifyError> {
        let fail = |reason: String| ClassifyError::Database {
            path: db_path.to_path_buf(),
            reason,
        };
        if !db_path.is_dir() {
            return Err(fail("directory not found".to_string()));
        }
        let missing: Vec<&str> = self
            .config
            .required_index_files
            .iter()
            .filter(|name| !db_path.join(name.as_str()).is_file())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(fail(format!("missing index file(s): {}", missing.join(", "))));
        }
        Ok(())
    }
}

impl ClassificationSource for KrakenClassifier {
    fn name(&self) -> &str {
        "kraken2"
    }

    fn produce(&self, request: &ClassificationRequest) -> Result<SampleAbundanceTable, ClassifyError> {
        self.run(
            &request.fastq_files,
            &request.db_path,
            &request.sample_id,
            request.confidence,
            &request.cancel,
        )
    }
}

/// Returns the compression shared by every input. Kraken2 takes one
/// compression flag per run, so mixed inputs are rejected.
fn check_compression(inputs: &[PathBuf]) -> Result<InputCompression, InputError> {
    let mut shared = None;
    for path in inputs {
        let compression = input_compression(path)?;
        match shared {
            None => shared = Some(compression),
            Some(c) if c == compression => {}
            Some(c) => {
                return Err(InputError::Malformed {
                    path: path.clone(),
                    reason: format!(
                        "{:?} input cannot be mixed with {:?} input in one run",
                        compression, c
                    ),
                })
            }
        }
    }
    Ok(shared.unwrap_or(InputCompression::Plain))
}

fn compression_flag(compression: InputCompression) -> Option<&'static str> {
    match compression {
        InputCompression::Plain => None,
        InputCompression::Gzip => Some("--gzip-compressed"),
        InputCompression::Bzip2 => Some("--bzip2-compressed"),
    }
}

fn scratch_prefix(sample_id: &str) -> String {
    let safe: String = sample_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("kraken2-{}-", safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const FASTQ: &str = "@read1\nACGTACGT\n+\nIIIIIIII\n";

    /// Shell stand-in for kraken2 that writes a fixed report.
    const FAKE_KRAKEN: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --report) REPORT="$2"; shift 2;;
    --output) OUTPUT="$2"; shift 2;;
    --db|--threads|--confidence) shift 2;;
    *) shift;;
  esac
done
printf 'classified\n' > "$OUTPUT"
printf '10.00\t100\t100\tU\t0\tunclassified\n90.00\t900\t0\tR\t1\troot\n90.00\t900\t0\tD\t2\t  Bacteria\n50.00\t500\t0\tP\t1239\t    Bacillota\n30.00\t300\t300\tS\t1313\t          Streptococcus pneumoniae\n20.00\t200\t200\tS\t1305\t          Streptococcus sanguinis\n40.00\t400\t0\tP\t976\t    Bacteroidota\n40.00\t400\t400\tS\t817\t          Bacteroides fragilis\n' > "$REPORT"
"#;

    struct Fixture {
        _dir: TempDir,
        db: PathBuf,
        fastq: PathBuf,
        scratch: PathBuf,
        script: PathBuf,
    }

    fn fixture(script_body: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        fs::create_dir(&db).unwrap();
        for name in ["hash.k2d", "opts.k2d", "taxo.k2d"] {
            fs::write(db.join(name), b"").unwrap();
        }
        let fastq = dir.path().join("barcode01.fastq");
        fs::write(&fastq, FASTQ).unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let script = dir.path().join("kraken2.sh");
        fs::write(&script, script_body).unwrap();
        Fixture {
            _dir: dir,
            db,
            fastq,
            scratch,
            script,
        }
    }

    fn classifier(fx: &Fixture, timeout_secs: u64) -> KrakenClassifier {
        let config = ClassifierConfig {
            binary: PathBuf::from("sh"),
            extra_args: vec![fx.script.to_string_lossy().into_owned()],
            threads: 1,
            timeout_secs,
            scratch_dir: Some(fx.scratch.clone()),
            ..ClassifierConfig::default()
        };
        KrakenClassifier::new(config, Arc::new(TaxonomyMapper::new()))
    }

    fn scratch_is_empty(fx: &Fixture) -> bool {
        fs::read_dir(&fx.scratch).unwrap().next().is_none()
    }

    #[test]
    fn test_confidence_out_of_range() {
        let fx = fixture(FAKE_KRAKEN);
        let err = classifier(&fx, 10)
            .classify(&[fx.fastq.clone()], &fx.db, "s", 1.5)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Config(_)));
    }

    #[test]
    fn test_missing_inputs() {
        let fx = fixture(FAKE_KRAKEN);
        let c = classifier(&fx, 10);
        assert!(matches!(
            c.classify(&[], &fx.db, "s", 0.1),
            Err(ClassifyError::Input(InputError::NoInputs))
        ));
        let missing = fx.db.join("nope.fastq");
        assert!(matches!(
            c.classify(&[missing], &fx.db, "s", 0.1),
            Err(ClassifyError::Input(InputError::Missing(_)))
        ));
    }

    #[test]
    fn test_database_checks() {
        let fx = fixture(FAKE_KRAKEN);
        let c = classifier(&fx, 10);
        let err = c
            .classify(&[fx.fastq.clone()], &fx.db.join("absent"), "s", 0.1)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Database { .. }));

        fs::remove_file(fx.db.join("taxo.k2d")).unwrap();
        let err = c.classify(&[fx.fastq.clone()], &fx.db, "s", 0.1).unwrap_err();
        match err {
            ClassifyError::Database { reason, .. } => assert!(reason.contains("taxo.k2d")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_compression_rejected() {
        let inputs = vec![
            PathBuf::from("a.fastq.gz"),
            PathBuf::from("b.fastq"),
            PathBuf::from("c.fastq.bz2"),
        ];
        assert!(check_compression(&inputs[..2]).is_err());
        assert!(check_compression(&[inputs[0].clone(), inputs[2].clone()]).is_err());
        assert_eq!(check_compression(&inputs[..1]).unwrap(), InputCompression::Gzip);
        assert_eq!(check_compression(&inputs[1..2]).unwrap(), InputCompression::Plain);
        assert_eq!(check_compression(&inputs[2..]).unwrap(), InputCompression::Bzip2);
        assert_eq!(compression_flag(InputCompression::Bzip2), Some("--bzip2-compressed"));
        assert_eq!(compression_flag(InputCompression::Gzip), Some("--gzip-compressed"));
        assert_eq!(compression_flag(InputCompression::Plain), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_run_parses_report_and_cleans_up() {
        let fx = fixture(FAKE_KRAKEN);
        let table = classifier(&fx, 30)
            .classify(&[fx.fastq.clone()], &fx.db, "barcode01", 0.1)
            .unwrap();
        assert_eq!(table.sample_id(), "barcode01");
        assert_eq!(table.len(), 3);
        assert_eq!(table.unclassified_reads(), 100);
        assert_eq!(table.total_reads(), 1000);
        assert_eq!(table.records()[2].phylum, "Bacteroidota");
        assert!(scratch_is_empty(&fx));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_execution_error() {
        let fx = fixture("echo 'kraken2: database load failed' >&2\nexit 1\n");
        let err = classifier(&fx, 30)
            .classify(&[fx.fastq.clone()], &fx.db, "s", 0.0)
            .unwrap_err();
        match err {
            ClassifyError::Execution { detail, .. } => assert!(detail.contains("database load failed")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(scratch_is_empty(&fx));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_cleans_up() {
        let fx = fixture("sleep 30\n");
        let err = classifier(&fx, 1)
            .classify(&[fx.fastq.clone()], &fx.db, "s", 0.0)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::ExecutionTimeout { timeout_secs: 1, .. }));
        assert!(scratch_is_empty(&fx));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_report_is_parse_error() {
        let fx = fixture("exit 0\n");
        let err = classifier(&fx, 30)
            .classify(&[fx.fastq.clone()], &fx.db, "s", 0.0)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Parse(_)));
        assert!(scratch_is_empty(&fx));
    }

    #[test]
    fn test_scratch_prefix_is_safe() {
        assert_eq!(scratch_prefix("run 1/barcode01"), "kraken2-run_1_barcode01-");
    }
}
