//! External collaborators: the project's test suite and the timing sampler
//!
//! Both are opaque commands. For the test suite, exit code 0 means parity
//! was preserved; nothing else about it is assumed.

use crate::config::PerfConfig;
use crate::error::ValidationError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

const TAIL_BYTES: usize = 2048;

/// Result of one test-suite invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Exit code, `None` if killed by a signal or timed out
    pub exit_code: Option<i32>,
    /// Wall time
    pub duration_ms: u64,
    /// The time budget was exceeded and the process killed
    pub timed_out: bool,
    /// Last bytes of combined output
    pub output_tail: String,
}

impl TestOutcome {
    /// Exit code zero within the time budget
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs the project's test suite
#[async_trait]
pub trait TestRunner: Send + Sync + std::fmt::Debug {
    /// Whether the runner can be invoked at all (checked at INIT)
    fn is_available(&self) -> bool;

    /// Time budget
    fn timeout(&self) -> Duration;

    /// Run the suite in `project_root`
    ///
    /// # Errors
    /// `ValidationError::Runner` if the suite cannot be started.
    async fn run(&self, project_root: &Path) -> Result<TestOutcome, ValidationError>;
}

/// Locate `program` on `PATH` (or as a literal path)
#[must_use]
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|p| p.is_file())
    })
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Test runner backed by a shell command
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandTestRunner {
    /// Create runner for `command` (program followed by arguments)
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Configured command
    #[inline]
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    fn is_available(&self) -> bool {
        self.command
            .first()
            .is_some_and(|program| find_program(program).is_some())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[tracing::instrument(skip(self), fields(command = %self.command.join(" ")))]
    async fn run(&self, project_root: &Path) -> Result<TestOutcome, ValidationError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ValidationError::Runner("empty test command".into()))?;

        let child = Command::new(program)
            .args(args)
            .current_dir(project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ValidationError::Runner(format!("{program}: {e}")))?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Err(_elapsed) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "test suite timed out");
                Ok(TestOutcome {
                    exit_code: None,
                    duration_ms,
                    timed_out: true,
                    output_tail: String::new(),
                })
            }
            Ok(Err(e)) => Err(ValidationError::Runner(e.to_string())),
            Ok(Ok(output)) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                let outcome = TestOutcome {
                    exit_code: output.status.code(),
                    duration_ms,
                    timed_out: false,
                    output_tail: tail(&combined),
                };
                tracing::info!(
                    exit_code = ?outcome.exit_code,
                    duration_ms,
                    "test suite finished"
                );
                Ok(outcome)
            }
        }
    }
}

/// Times a synthetic logging workload before and after migration
#[derive(Debug, Clone)]
pub struct PerfSampler {
    config: PerfConfig,
    timeout: Duration,
}

impl PerfSampler {
    /// Create sampler
    #[must_use]
    pub fn new(config: PerfConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Overhead threshold in percent
    #[inline]
    #[must_use]
    pub fn threshold_percent(&self) -> f64 {
        self.config.threshold_percent
    }

    /// Mean wall time of the timing command over the configured iterations
    ///
    /// # Errors
    /// `ValidationError::Runner` if the command cannot run, fails, or
    /// exceeds the time budget.
    pub async fn measure(&self, project_root: &Path) -> Result<Duration, ValidationError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| ValidationError::Runner("empty perf command".into()))?;

        let mut total = Duration::ZERO;
        for _ in 0..self.config.iterations {
            let started = Instant::now();
            let status = tokio::time::timeout(
                self.timeout,
                Command::new(program)
                    .args(args)
                    .current_dir(project_root)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status(),
            )
            .await
            .map_err(|_| ValidationError::Runner("perf sampler timed out".into()))?
            .map_err(|e| ValidationError::Runner(format!("{program}: {e}")))?;
            if !status.success() {
                return Err(ValidationError::Runner(format!(
                    "perf sampler exited with {:?}",
                    status.code()
                )));
            }
            total += started.elapsed();
        }
        Ok(total / self.config.iterations.max(1))
    }

    /// Relative overhead of `after` over `before`, in percent
    #[must_use]
    pub fn overhead_percent(before: Duration, after: Duration) -> f64 {
        if before.is_zero() {
            return 0.0;
        }
        (after.as_secs_f64() - before.as_secs_f64()) / before.as_secs_f64() * 100.0
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str, timeout: Duration) -> CommandTestRunner {
        CommandTestRunner::new(vec!["sh".into(), "-c".into(), script.into()], timeout)
    }

    #[tokio::test]
    async fn zero_exit_passes() {
        let dir = TempDir::new().unwrap();
        let outcome = sh("echo ok", Duration::from_secs(10)).run(dir.path()).await.unwrap();
        assert!(outcome.passed());
        assert!(outcome.output_tail.contains("ok"));
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let dir = TempDir::new().unwrap();
        let outcome = sh("exit 3", Duration::from_secs(10)).run(dir.path()).await.unwrap();
        assert!(!outcome.passed());
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let outcome = sh("sleep 5", Duration::from_millis(100))
            .run(dir.path())
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.passed());
    }

    #[test]
    fn availability_checks_path() {
        assert!(sh("true", Duration::from_secs(1)).is_available());
        let missing = CommandTestRunner::new(
            vec!["definitely-not-a-real-program-xyz".into()],
            Duration::from_secs(1),
        );
        assert!(!missing.is_available());
        assert!(!CommandTestRunner::new(Vec::new(), Duration::from_secs(1)).is_available());
    }

    #[tokio::test]
    async fn perf_sampler_measures_mean() {
        let dir = TempDir::new().unwrap();
        let sampler = PerfSampler::new(
            PerfConfig {
                command: vec!["true".into()],
                iterations: 2,
                threshold_percent: 10.0,
            },
            Duration::from_secs(10),
        );
        sampler.measure(dir.path()).await.unwrap();
        let pct = PerfSampler::overhead_percent(Duration::from_millis(100), Duration::from_millis(150));
        assert!((pct - 50.0).abs() < 1e-6);
    }
}
