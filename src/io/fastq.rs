//! Sequence input discovery and validation.
//!
//! Leverages the `needletail` crate to check that every input is a readable
//! FASTQ/FASTA file (compressed or not) before a classifier is started on
//! it. Directories are expanded to the sequence files they contain, which is
//! how per-barcode output folders from a sequencing run are passed in.

use log::{debug, info, warn};
use needletail::parse_fastx_file;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions recognised as sequence input when scanning directories.
const SEQUENCE_EXTENSIONS: &[&str] = &["fastq", "fq", "fasta", "fa", "fna", "gz", "bz2"];

/// Compressed formats Kraken2 cannot read.
const UNSUPPORTED_COMPRESSION: &[&str] = &["zst", "xz"];

/// Compression of an input file, as marked by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCompression {
    Plain,
    Gzip,
    Bzip2,
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("No input files were given")]
    NoInputs,

    #[error("Input path does not exist: {0}")]
    Missing(PathBuf),

    #[error("Directory {0} contains no sequence files")]
    NoSequenceFiles(PathBuf),

    #[error("Input file {0} contains no reads")]
    Empty(PathBuf),

    #[error("Input file {path} is not valid FASTQ/FASTA: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Expands the given paths into the list of sequence files to classify.
///
/// Files are taken as-is; directories contribute every file (recursively)
/// with a known sequence extension, in sorted order.
///
/// # Arguments
///
/// * `paths` - Files and/or directories.
///
/// # Returns
///
/// * `Result<Vec<PathBuf>, InputError>` - The discovered files, or an error if
///   any path is missing or a directory holds no sequence files.
pub fn find_sequence_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, InputError> {
    if paths.is_empty() {
        return Err(InputError::NoInputs);
    }

    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            return Err(InputError::Missing(path.clone()));
        }
        if path.is_dir() {
            debug!("Scanning directory: {}", path.display());
            let found = scan_directory(path)?;
            if found.is_empty() {
                return Err(InputError::NoSequenceFiles(path.clone()));
            }
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
    let io_err = |source| InputError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry_path = entry.map_err(io_err)?.path();
        if entry_path.is_dir() {
            files.extend(scan_directory(&entry_path)?);
        } else if has_sequence_extension(&entry_path) {
            files.push(entry_path);
        } else {
            debug!("Skipping file with unknown extension: {}", entry_path.display());
        }
    }
    files.sort();
    Ok(files)
}

fn has_sequence_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SEQUENCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Detects the compression of `path` from its extension.
///
/// `.zst` and `.xz` inputs are rejected as `Malformed`, since the classifier
/// has no flag for them.
pub fn input_compression(path: &Path) -> Result<InputCompression, InputError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "gz" => Ok(InputCompression::Gzip),
        "bz2" => Ok(InputCompression::Bzip2),
        e if UNSUPPORTED_COMPRESSION.contains(&e) => Err(InputError::Malformed {
            path: path.to_path_buf(),
            reason: format!(".{} compression is not supported; use gzip or bzip2", e),
        }),
        _ => Ok(InputCompression::Plain),
    }
}

/// Checks that a file parses as FASTQ/FASTA by reading its first record.
pub fn validate_sequence_file(path: &Path) -> Result<(), InputError> {
    if !path.is_file() {
        return Err(InputError::Missing(path.to_path_buf()));
    }

    let mut reader = parse_fastx_file(path).map_err(|e| {
        // needletail reports an empty file as a parse error on open
        if fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false) {
            InputError::Empty(path.to_path_buf())
        } else {
            InputError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;

    match reader.next() {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(InputError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        None => Err(InputError::Empty(path.to_path_buf())),
    }
}

/// Resolves and validates a sample's inputs in one step.
pub fn resolve_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>, InputError> {
    let files = find_sequence_files(paths)?;
    for file in &files {
        input_compression(file).inspect_err(|e| warn!("Rejected input: {}", e))?;
        validate_sequence_file(file).inspect_err(|e| warn!("Rejected input: {}", e))?;
    }
    info!("Validated {} input file(s)", files.len());
    Ok(files)
}
