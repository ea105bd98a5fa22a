use log::{debug, error};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Invalid worker count: {0}")]
    InvalidWorkerCount(usize),
}

/// Shared flag used to abort a running batch.
///
/// Clones observe the same flag. Workers check it before starting a sample
/// and the subprocess runner polls it while a classifier is running.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Irreversible.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads
    pub threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            threads: num_cpus::get(),
        }
    }
}

/// Bounded worker pool that runs one closure per item.
pub struct ParallelExecutor {
    /// Thread pool
    pool: rayon::ThreadPool,

    /// Configuration
    config: ParallelConfig,
}

impl ParallelExecutor {
    /// Create a new parallel executor
    pub fn new(config: Option<ParallelConfig>) -> Result<Self, ParallelError> {
        let config = config.unwrap_or_default();
        if config.threads == 0 {
            return Err(ParallelError::InvalidWorkerCount(0));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("sample-worker-{}", i))
            .build()
            .map_err(|e| {
                ParallelError::ThreadError(format!("Failed to build thread pool: {}", e))
            })?;

        debug!("Worker pool ready with {} thread(s)", config.threads);
        Ok(ParallelExecutor { pool, config })
    }

    pub fn threads(&self) -> usize {
        self.config.threads
    }

    /// Runs `processor` on every item, at most `threads` at a time.
    ///
    /// Results come back in input order. A panic inside `processor` is caught
    /// and returned as `Err` with the panic message, leaving the other items
    /// unaffected.
    pub fn execute<T, U, F>(&self, items: &[T], processor: F) -> Vec<Result<U, String>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Send + Sync,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    panic::catch_unwind(AssertUnwindSafe(|| processor(item))).map_err(|payload| {
                        let message = panic_message(payload.as_ref());
                        error!("Worker panicked: {}", message);
                        message
                    })
                })
                .collect()
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_execute_preserves_order() {
        let executor = ParallelExecutor::new(Some(ParallelConfig { threads: 3 })).unwrap();
        let items: Vec<u32> = (0..20).collect();
        let results = executor.execute(&items, |x| x * 2);
        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..20).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_execute_isolates_panics() {
        let executor = ParallelExecutor::new(Some(ParallelConfig { threads: 2 })).unwrap();
        let calls = AtomicUsize::new(0);
        let results = executor.execute(&[1, 2, 3, 4], |&x| {
            calls.fetch_add(1, Ordering::SeqCst);
            if x == 3 {
                panic!("sample {} exploded", x);
            }
            x
        });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert_eq!(results[2].as_ref().unwrap_err(), "sample 3 exploded");
        assert_eq!(results[3].as_ref().unwrap(), &4);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            ParallelExecutor::new(Some(ParallelConfig { threads: 0 })),
            Err(ParallelError::InvalidWorkerCount(0))
        ));
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
