//! Clinical microbiome profiling.
//!
//! Turns taxonomic classifier output into a per-sample clinical summary:
//! a filtered species list, a phylum distribution and a dysbiosis index.
//! Kraken2 is the primary classifier; a configurable legacy pipeline takes
//! over when it fails or produces low-quality output.

pub mod abundance;
pub mod bio;
pub mod classify;
pub mod cli;
pub mod clinical;
pub mod config;
pub mod io;
pub mod pipeline;
pub mod utils;
