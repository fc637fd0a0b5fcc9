//! Configuration loading and validation for coproc
//!
//! A `coproc.toml` file carries two optional tables: `[settings]` tunes the
//! process handles, `[launch]` describes a process to spawn. Defaults come
//! from serde defaults; validation reports field-path error messages.
//!
//! ```toml
//! [settings]
//! attachPollIntervalMs = 25
//!
//! [launch]
//! command = "sh"
//! args = ["-c", "exit 3"]
//! workingDirectory = "/tmp"
//! stdout = "piped"
//!
//! [launch.environment]
//! GREETING = "hello"
//! ```

use crate::{CoreError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables shared by every handle created from an executor
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Polling period used to watch attached processes that are not our children
    pub attach_poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            attach_poll_interval_ms: 50,
        }
    }
}

impl Settings {
    /// Polling period as a `Duration`
    pub fn attach_poll_interval(&self) -> Duration {
        Duration::from_millis(self.attach_poll_interval_ms)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.attach_poll_interval_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "settings.attachPollIntervalMs: must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stdio wiring for one standard stream
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    /// Share the parent's stream
    #[default]
    Inherit,
    /// Connect to `/dev/null`
    Null,
    /// Create a pipe the caller can take from the handle
    Piped,
}

impl From<StdioMode> for std::process::Stdio {
    fn from(mode: StdioMode) -> Self {
        match mode {
            StdioMode::Inherit => std::process::Stdio::inherit(),
            StdioMode::Null => std::process::Stdio::null(),
            StdioMode::Piped => std::process::Stdio::piped(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Description of a process to spawn
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    /// Executable to run (resolved through `PATH` when not absolute)
    pub command: String,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Start directory; the current directory when omitted
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Whether the current environment is inherited underneath `environment`
    #[serde(default = "default_true")]
    pub inherit_environment: bool,
    #[serde(default)]
    pub stdin: StdioMode,
    #[serde(default)]
    pub stdout: StdioMode,
    #[serde(default)]
    pub stderr: StdioMode,
}

impl LaunchSpec {
    /// A spec for `command` with everything else defaulted
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
            inherit_environment: true,
            stdin: StdioMode::Inherit,
            stdout: StdioMode::Inherit,
            stderr: StdioMode::Inherit,
        }
    }

    /// Set the command line arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "launch.command: cannot be empty".to_string(),
            ));
        }
        for key in self.environment.keys() {
            if key.trim().is_empty() {
                return Err(CoreError::ValidationError(
                    "launch.environment: keys cannot be empty".to_string(),
                ));
            }
            if key.contains('=') || key.contains('\0') {
                return Err(CoreError::ValidationError(format!(
                    "launch.environment.{}: keys cannot contain '=' or NUL",
                    key
                )));
            }
        }
        if let Some(dir) = &self.working_directory {
            if dir.as_os_str().is_empty() {
                return Err(CoreError::ValidationError(
                    "launch.workingDirectory: cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Build the configuration bundle used by `ProcessHandle::spawn`
    #[cfg(unix)]
    pub fn to_process_args(&self) -> crate::process::ProcessArgs {
        let mut args = crate::process::ProcessArgs::new()
            .with_stdin(self.stdin.into())
            .with_stdout(self.stdout.into())
            .with_stderr(self.stderr.into());
        if let Some(dir) = &self.working_directory {
            args = args.with_start_dir(dir);
        }
        if !self.inherit_environment {
            args = args.with_env(&self.environment);
        } else if !self.environment.is_empty() {
            let mut env: BTreeMap<String, String> = std::env::vars().collect();
            env.extend(self.environment.clone());
            args = args.with_env(env);
        }
        args
    }
}

/// Top-level TOML structure of `coproc.toml`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoprocFile {
    /// Handle tunables
    #[serde(default)]
    pub settings: Settings,
    /// Optional process to launch
    #[serde(default)]
    pub launch: Option<LaunchSpec>,
}

impl CoprocFile {
    /// Validate every section that is present
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if let Some(launch) = &self.launch {
            launch.validate()?;
        }
        Ok(())
    }
}

/// Load configuration from a TOML file path
pub fn load_from_toml_path(path: impl AsRef<Path>) -> Result<CoprocFile> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_from_toml_str(&data)
}

/// Load configuration from a TOML string
pub fn load_from_toml_str(input: &str) -> Result<CoprocFile> {
    let cfg: CoprocFile = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_config() {
        let input = r#"
        [settings]
        attachPollIntervalMs = 25

        [launch]
        command = "sh"
        args = ["-c", "exit 3"]
        workingDirectory = "/tmp"
        inheritEnvironment = false
        stdout = "piped"
        stderr = "null"

        [launch.environment]
        GREETING = "hello"
        "#;
        let cfg = load_from_toml_str(input).expect("should parse");
        assert_eq!(cfg.settings.attach_poll_interval(), Duration::from_millis(25));

        let launch = cfg.launch.expect("launch table");
        assert_eq!(launch.command, "sh");
        assert_eq!(launch.args, vec!["-c", "exit 3"]);
        assert_eq!(launch.working_directory, Some(PathBuf::from("/tmp")));
        assert!(!launch.inherit_environment);
        assert_eq!(launch.stdin, StdioMode::Inherit);
        assert_eq!(launch.stdout, StdioMode::Piped);
        assert_eq!(launch.stderr, StdioMode::Null);
        assert_eq!(launch.environment.get("GREETING").map(String::as_str), Some("hello"));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = load_from_toml_str("").expect("should parse");
        assert_eq!(cfg, CoprocFile::default());
        assert_eq!(cfg.settings.attach_poll_interval_ms, 50);
    }

    #[test]
    fn launch_defaults_inherit_everything() {
        let cfg = load_from_toml_str("[launch]\ncommand = \"true\"").expect("should parse");
        let launch = cfg.launch.expect("launch table");
        assert_eq!(launch, LaunchSpec::new("true"));
    }

    #[test]
    fn errors_on_zero_poll_interval() {
        let err = load_from_toml_str("[settings]\nattachPollIntervalMs = 0").unwrap_err();
        assert!(format!("{}", err).contains("settings.attachPollIntervalMs"));
    }

    #[test]
    fn errors_on_empty_command() {
        let err = load_from_toml_str("[launch]\ncommand = \"  \"").unwrap_err();
        assert!(format!("{}", err).contains("launch.command: cannot be empty"));
    }

    #[test]
    fn errors_on_bad_env_key() {
        let input = r#"
        [launch]
        command = "env"
        [launch.environment]
        "A=B" = "x"
        "#;
        let err = load_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("launch.environment.A=B"));
    }

    #[test]
    fn errors_on_unknown_stdio_mode() {
        let err = load_from_toml_str("[launch]\ncommand = \"true\"\nstdout = \"tty\"").unwrap_err();
        assert_eq!(err.code(), "CORE001");
    }

    #[test]
    fn loads_from_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[launch]\ncommand = \"sleep\"\nargs = [\"1\"]").expect("write");
        let cfg = load_from_toml_path(file.path()).expect("should load");
        assert_eq!(cfg.launch.map(|l| l.args), Some(vec!["1".to_string()]));
    }

    #[test]
    fn missing_path_is_configuration_error() {
        let err = load_from_toml_path("/nonexistent/coproc.toml").unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }
}
