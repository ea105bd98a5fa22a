//! Bioinformatics utilities module.
//!
//! Groups the taxonomy helpers used to normalise classifier output
//! (genus extraction, phylum and kingdom lookup).

pub mod taxonomy;

pub use taxonomy::{
    extract_genus, infer_kingdom, map_to_phylum, normalize_phylum, TaxonomicLevel,
    TaxonomyMapper, UNKNOWN,
};
