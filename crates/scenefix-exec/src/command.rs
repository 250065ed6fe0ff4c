//! External command descriptions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Human-readable label used in logs.
    pub name: String,

    /// Executable, resolved through `PATH` when not absolute.
    pub program: String,

    pub args: Vec<String>,

    /// Working directory; inherits the current one when `None`.
    pub cwd: Option<PathBuf>,

    /// Kill the process after this many seconds. 0 disables the limit.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout_secs: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Program and arguments as one shell-like line, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cmd = CommandSpec::new("render", "manim")
            .arg("-ql")
            .args(["section_1.py", "Section1Scene"])
            .current_dir("/tmp/out")
            .timeout_secs(180);
        assert_eq!(cmd.display(), "manim -ql section_1.py Section1Scene");
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp/out")));
        assert_eq!(cmd.timeout_secs, 180);
    }
}
