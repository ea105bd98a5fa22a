pub mod processor;
pub mod report;
pub mod sample_sheet;

pub use processor::{
    ProcessingError, SampleOutcome, SampleProcessor, SampleResult, SampleSpec,
};
pub use report::{generate_batch_summary, generate_report};
pub use sample_sheet::{discover_barcode_dirs, load_sample_sheet, SampleSheetError};
