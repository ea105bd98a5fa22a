//! Running external tools with a deadline.
//!
//! The child's stdout is discarded and its stderr goes to a file, so a
//! chatty tool can never block on a full pipe while we poll it. On Unix the
//! child leads its own process group; on timeout or cancellation the whole
//! group is killed, so helpers started by wrapper scripts die with it, and
//! the child is reaped before returning.

use super::ClassifyError;
use crate::utils::CancellationToken;
use log::{debug, warn};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `command` to completion, killing it after `timeout` or as soon as
/// `cancel` is triggered.
///
/// # Arguments
///
/// * `command` - Fully configured command; stdio is overridden.
/// * `timeout` - Wall-clock limit for the child.
/// * `cancel` - Batch cancellation flag, polled while waiting.
/// * `stderr_path` - File that receives the child's stderr.
///
/// # Returns
///
/// * `Result<Duration, ClassifyError>` - Run time on exit code 0. A non-zero
///   exit gives `Execution` carrying the tail of stderr.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
    cancel: &CancellationToken,
    stderr_path: &Path,
) -> Result<Duration, ClassifyError> {
    let program = command.get_program().to_string_lossy().into_owned();
    if cancel.is_cancelled() {
        return Err(ClassifyError::Cancelled);
    }

    let stderr_file = File::create(stderr_path)?;
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    debug!("Running: {:?}", command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(|e| ClassifyError::Execution {
            program: program.clone(),
            detail: format!("failed to start: {}", e),
        })?;

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancel.is_cancelled() {
                    warn!("Cancelling {} (PID: {})", program, child.id());
                    terminate(&mut child);
                    return Err(ClassifyError::Cancelled);
                }
                if start.elapsed() >= timeout {
                    warn!(
                        "{} exceeded {}s, killing process (PID: {})",
                        program,
                        timeout.as_secs(),
                        child.id()
                    );
                    terminate(&mut child);
                    return Err(ClassifyError::ExecutionTimeout {
                        program,
                        timeout_secs: timeout.as_secs(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                terminate(&mut child);
                return Err(ClassifyError::Execution {
                    program,
                    detail: format!("failed to check process status: {}", e),
                });
            }
        }
    };

    let elapsed = start.elapsed();
    if !status.success() {
        let code = status
            .code()
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {}", c));
        let stderr = stderr_tail(stderr_path);
        let detail = if stderr.is_empty() {
            code
        } else {
            format!("{}: {}", code, stderr)
        };
        return Err(ClassifyError::Execution { program, detail });
    }

    debug!("{} finished in {:.1}s", program, elapsed.as_secs_f64());
    Ok(elapsed)
}

/// Creates a per-run scratch directory under `parent`, or under the system
/// temp dir when `parent` is `None`. It is removed when dropped.
pub fn scratch_tempdir(parent: Option<&Path>, prefix: &str) -> std::io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match parent {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
}

fn terminate(child: &mut Child) {
    kill_process_group(child);
    if let Err(e) = child.kill() {
        debug!("kill failed (process may have exited): {}", e);
    }
    let _ = child.wait();
}

/// Sends SIGKILL to the child's process group. The group id equals the
/// child's pid because it was spawned with `process_group(0)`.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; it touches no memory of ours.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "killpg({}) failed (group may have exited): {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn stderr_tail(path: &Path) -> String {
    let content = fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_success() {
        let dir = tempdir().unwrap();
        let result = run_with_timeout(
            &mut sh("echo hello; exit 0"),
            Duration::from_secs(10),
            &CancellationToken::new(),
            &dir.path().join("stderr.txt"),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_nonzero_exit_captures_stderr() {
        let dir = tempdir().unwrap();
        let err = run_with_timeout(
            &mut sh("echo 'database hash.k2d is corrupt' >&2; exit 3"),
            Duration::from_secs(10),
            &CancellationToken::new(),
            &dir.path().join("stderr.txt"),
        )
        .unwrap_err();
        match err {
            ClassifyError::Execution { program, detail } => {
                assert_eq!(program, "sh");
                assert!(detail.contains("exit code 3"));
                assert!(detail.contains("hash.k2d is corrupt"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = tempdir().unwrap();
        let start = Instant::now();
        let err = run_with_timeout(
            &mut sh("sleep 30"),
            Duration::from_millis(300),
            &CancellationToken::new(),
            &dir.path().join("stderr.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::ExecutionTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_kills_background_descendants() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("(sleep 2; touch '{}') & wait", marker.display());
        let err = run_with_timeout(
            &mut sh(&script),
            Duration::from_millis(300),
            &CancellationToken::new(),
            &dir.path().join("stderr.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::ExecutionTimeout { .. }));

        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "descendant outlived the killed child");
    }

    #[test]
    fn test_cancel_kills_background_descendants() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("(sleep 2; touch '{}') & wait", marker.display());
        let token = CancellationToken::new();
        let trigger = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let err = run_with_timeout(
            &mut sh(&script),
            Duration::from_secs(60),
            &token,
            &dir.path().join("stderr.txt"),
        )
        .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, ClassifyError::Cancelled));

        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists());
    }

    #[test]
    fn test_cancel_kills_child() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let start = Instant::now();
        let err = run_with_timeout(
            &mut sh("sleep 30"),
            Duration::from_secs(60),
            &token,
            &dir.path().join("stderr.txt"),
        )
        .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, ClassifyError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_scratch_tempdir_parent() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("a/b");
        let scratch = scratch_tempdir(Some(&parent), "run-").unwrap();
        assert_eq!(scratch.path().parent(), Some(parent.as_path()));
        let path = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_program() {
        let dir = tempdir().unwrap();
        let err = run_with_timeout(
            &mut Command::new("/nonexistent/kraken2"),
            Duration::from_secs(1),
            &CancellationToken::new(),
            &dir.path().join("stderr.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::Execution { .. }));
        assert!(err.is_recoverable());
    }
}
