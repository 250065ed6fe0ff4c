//! Dry-run validation in a Python subprocess.
//!
//! The candidate is written to `test_<section_id>.py` in the section's output
//! directory with its `construct` body short-circuited, then imported and
//! instantiated by `python -c`. The scratch file is removed afterwards whatever
//! the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scenefix_core::validate::{dry_run_snippet, dry_run_source};
use scenefix_core::{DryRunOutcome, DryRunner, GatedValidator};
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::runner::ProcessRunner;

/// Removes its file when dropped.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn create(path: PathBuf, contents: &str) -> std::io::Result<Self> {
        std::fs::write(&path, contents)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not remove scratch file");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PythonDryRunner {
    python: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl PythonDryRunner {
    pub fn new(python: impl Into<String>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn module_name(section_id: &str) -> String {
        format!("test_{}", section_id)
    }

    /// `-B` keeps the import from leaving `__pycache__` bytecode behind.
    fn import_command(&self, section_id: &str, module: &str, scene_class: &str) -> CommandSpec {
        CommandSpec::new(format!("dry-run {}", section_id), &self.python)
            .arg("-B")
            .arg("-c")
            .arg(dry_run_snippet(module, scene_class))
            .current_dir(&self.work_dir)
            .timeout_secs(self.timeout.as_secs().max(1))
    }
}

#[async_trait]
impl DryRunner for PythonDryRunner {
    async fn dry_run(&self, section_id: &str, source: &str, scene_class: &str) -> DryRunOutcome {
        let module = Self::module_name(section_id);
        let scratch = match ScratchFile::create(
            self.work_dir.join(format!("{}.py", module)),
            &dry_run_source(source),
        ) {
            Ok(file) => file,
            Err(e) => {
                return DryRunOutcome {
                    passed: false,
                    message: format!("could not write dry-run file: {}", e),
                }
            }
        };

        let spec = self.import_command(section_id, &module, scene_class);
        let result = ProcessRunner::run(&spec).await;
        drop(scratch);

        match result {
            Ok(output) if output.passed() => {
                debug!(section_id = %section_id, "dry run passed");
                DryRunOutcome {
                    passed: true,
                    message: output.stdout.trim().to_string(),
                }
            }
            Ok(output) if output.timed_out => DryRunOutcome {
                passed: false,
                message: format!("dry run timed out after {}s", self.timeout.as_secs()),
            },
            Ok(output) => DryRunOutcome {
                passed: false,
                message: output.stderr,
            },
            Err(e) => DryRunOutcome {
                passed: false,
                message: format!("dry run could not start: {}", e),
            },
        }
    }
}

/// Syntax gate plus Python dry run, for one output directory.
pub fn python_validator(python: impl Into<String>, work_dir: impl Into<PathBuf>, timeout: Duration) -> GatedValidator {
    GatedValidator::new(Arc::new(PythonDryRunner::new(python, work_dir, timeout)))
}
