//! Child process execution with output capture and timeout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::CommandSpec;

/// Result of one process run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Command name.
    pub name: String,

    /// Exit code; -1 when killed or terminated by a signal.
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Whether the process exited with code 0 in time.
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Runs [`CommandSpec`]s.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn the command and wait for it.
    ///
    /// Fails only when the process cannot be spawned. A timeout kills the
    /// child and is reported through [`ProcessOutput::timed_out`].
    pub async fn run(spec: &CommandSpec) -> anyhow::Result<ProcessOutput> {
        if spec.program.is_empty() {
            anyhow::bail!("command {} has no program", spec.name);
        }
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        debug!(name = %spec.name, command = %spec.display(), "spawning");
        let child = command.spawn()?;

        let waited = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
        } else {
            Ok(child.wait_with_output().await)
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        // Dropping the timed-out future drops the child, which kills it.
        let output = match waited {
            Ok(output) => output?,
            Err(_) => {
                warn!(name = %spec.name, timeout_secs = spec.timeout_secs, "process timed out");
                return Ok(ProcessOutput {
                    name: spec.name.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!(
                        "{} timed out after {} seconds",
                        spec.name, spec.timeout_secs
                    ),
                    duration_ms,
                    timed_out: true,
                });
            }
        };

        Ok(ProcessOutput {
            name: spec.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_passed() {
        let mut output = ProcessOutput {
            name: "echo".to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 5,
            timed_out: false,
        };
        assert!(output.passed());
        output.timed_out = true;
        assert!(!output.passed());
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let spec = CommandSpec::new("echo", "echo").arg("hello").timeout_secs(10);
        let output = ProcessRunner::run(&spec).await.expect("run failed");
        assert!(output.passed());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_captures_failure() {
        let spec = CommandSpec::new("fail", "sh").args(["-c", "echo oops >&2; exit 3"]);
        let output = ProcessRunner::run(&spec).await.expect("run failed");
        assert!(!output.passed());
        assert_eq!(output.exit_code, 3);
        assert!(output.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let spec = CommandSpec::new("sleepy", "sleep").arg("5").timeout_secs(1);
        let output = ProcessRunner::run(&spec).await.expect("run failed");
        assert!(output.timed_out);
        assert!(!output.passed());
        assert!(output.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let spec = CommandSpec::new("ghost", "definitely-not-a-real-binary-xyz");
        assert!(ProcessRunner::run(&spec).await.is_err());
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("pwd", "pwd").current_dir(dir.path());
        let output = ProcessRunner::run(&spec).await.expect("run failed");
        let reported = std::path::PathBuf::from(output.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
