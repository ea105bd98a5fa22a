pub mod parallel;

pub use parallel::{CancellationToken, ParallelConfig, ParallelError, ParallelExecutor};
