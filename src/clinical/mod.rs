//! Clinical interpretation of abundance tables: relevance filtering and
//! dysbiosis scoring.

pub mod dysbiosis;
pub mod filter;

pub use dysbiosis::{
    DysbiosisCategory, DysbiosisConfig, DysbiosisResult, DysbiosisScorer, ReferenceRange,
};
pub use filter::{ClinicalFilter, ContextConfig, FilterError, RelevanceLists};
