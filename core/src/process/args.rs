//! Launch configuration bundle
//!
//! Everything here is resolved by the caller; [`ProcessArgs`] only carries it
//! to `std::process::Command`.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Standard stream wiring. `None` inherits the parent's stream.
#[derive(Debug, Default)]
pub struct ProcessStdio {
    pub stdin: Option<Stdio>,
    pub stdout: Option<Stdio>,
    pub stderr: Option<Stdio>,
}

/// Stdio, start directory and environment for a spawned process
#[derive(Debug, Default)]
pub struct ProcessArgs {
    /// Standard stream wiring
    pub stdio: ProcessStdio,
    /// Start directory; `None` keeps the current working directory
    pub start_dir: Option<PathBuf>,
    /// Complete environment block; `None` inherits the current environment
    pub env: Option<Vec<(OsString, OsString)>>,
}

impl ProcessArgs {
    /// Inherit stdio, directory and environment
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stdin(mut self, stdin: Stdio) -> Self {
        self.stdio.stdin = Some(stdin);
        self
    }

    pub fn with_stdout(mut self, stdout: Stdio) -> Self {
        self.stdio.stdout = Some(stdout);
        self
    }

    pub fn with_stderr(mut self, stderr: Stdio) -> Self {
        self.stdio.stderr = Some(stderr);
        self
    }

    /// Start the process in `dir`
    pub fn with_start_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.start_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Replace the whole environment with `vars`
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.as_ref().to_os_string(), v.as_ref().to_os_string()))
                .collect(),
        );
        self
    }

    /// Apply the bundle to a command
    pub(crate) fn apply(self, command: &mut Command) {
        if let Some(stdin) = self.stdio.stdin {
            command.stdin(stdin);
        }
        if let Some(stdout) = self.stdio.stdout {
            command.stdout(stdout);
        }
        if let Some(stderr) = self.stdio.stderr {
            command.stderr(stderr);
        }
        if let Some(dir) = self.start_dir {
            command.current_dir(dir);
        }
        if let Some(env) = self.env {
            command.env_clear();
            command.envs(env);
        }
    }
}
