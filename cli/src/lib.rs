//! coproc CLI library
//!
//! Drives process handles for the `coproc` binary: launch a process and await
//! it, adopt a running one, or deliver a single signal and let go.

pub mod error;

pub use error::{CliError, Result};

use coproc_core::config::load_from_toml_path;
use coproc_core::process::{Executor, ProcessHandle};
use coproc_core::{CoreError, LaunchSpec, Settings};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which request `coproc signal` delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SignalKind {
    /// `SIGINT`
    Interrupt,
    /// `SIGTERM`
    RequestExit,
    /// `SIGKILL`, then wait for the exit
    Terminate,
}

/// Options for `coproc run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `coproc.toml` to read `[settings]` and `[launch]` from
    pub config: Option<PathBuf>,
    /// Executable followed by its arguments; overrides `launch.command`/`launch.args`
    pub command: Vec<String>,
    /// Kill the process if it has not exited after this long
    pub timeout: Option<Duration>,
    /// Leave the process running and return right after spawn
    pub detach: bool,
}

/// What a command observed about its process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitReport {
    pub pid: u32,
    /// Portable exit code; absent while running or when unobservable
    pub exit_code: Option<i32>,
    /// Human readable wait status
    pub status: Option<String>,
    /// Name of the signal that killed the process
    pub signal: Option<String>,
    pub timed_out: bool,
    pub detached: bool,
}

impl ExitReport {
    fn from_handle(handle: &ProcessHandle, timed_out: bool) -> Self {
        let native = handle.native_exit_code();
        Self {
            pid: handle.id(),
            exit_code: native.map(|code| code.portable()),
            status: native.map(|code| code.to_string()),
            signal: native
                .and_then(|code| code.signal())
                .map(|signal| signal.as_str().to_string()),
            timed_out,
            detached: false,
        }
    }

    fn detached(pid: u32) -> Self {
        Self {
            pid,
            exit_code: None,
            status: None,
            signal: None,
            timed_out: false,
            detached: true,
        }
    }

    /// Render for stdout, as JSON or as one line of text
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            return Ok(serde_json::to_string(self)?);
        }
        let mut line = match (&self.status, self.detached) {
            (_, true) => format!("process {} detached", self.pid),
            (Some(status), false) => format!("process {}: {}", self.pid, status),
            (None, false) => format!("process {}: exit status unknown", self.pid),
        };
        if self.timed_out {
            line.push_str(" (timed out)");
        }
        Ok(line)
    }
}

/// How a wait ended
enum Settled {
    Exited,
    TimedOut,
    /// An attached non-child vanished; its status cannot be read
    Unobservable,
}

/// Executes CLI commands against one executor
#[derive(Debug, Clone)]
pub struct Runner {
    executor: Executor,
}

impl Runner {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Merge the config file and the command line into one launch spec
    pub fn resolve_launch(options: &RunOptions) -> Result<(LaunchSpec, Settings)> {
        let file = match &options.config {
            Some(path) => Some(load_from_toml_path(path).map_err(|e| {
                CliError::ConfigError(format!("{}: {}", path.display(), e))
            })?),
            None => None,
        };
        let settings = file
            .as_ref()
            .map(|f| f.settings.clone())
            .unwrap_or_default();
        let launch = file.and_then(|f| f.launch);

        let spec = match (options.command.split_first(), launch) {
            (Some((exe, args)), Some(launch)) => LaunchSpec {
                command: exe.clone(),
                args: args.to_vec(),
                ..launch
            },
            (Some((exe, args)), None) => LaunchSpec::new(exe.clone()).with_args(args.iter().cloned()),
            (None, Some(launch)) => launch,
            (None, None) => {
                return Err(CliError::InvalidArgument(
                    "no command given and no [launch] table in the config".to_string(),
                ))
            }
        };
        spec.validate()?;
        Ok((spec, settings))
    }

    /// Spawn a process and wait for it, killing it once the timeout expires.
    ///
    /// Timeouts call the blocking `terminate`, so this must run on a
    /// multi-threaded runtime.
    pub async fn run(&self, options: &RunOptions) -> Result<ExitReport> {
        let (spec, settings) = Self::resolve_launch(options)?;
        let executor = self.executor.clone().with_settings(settings);
        let handle = ProcessHandle::spawn(&executor, &spec.command, &spec.args, spec.to_process_args())?;
        info!("Running {} as process {}", spec.command, handle.id());

        if options.detach {
            let native = handle.detach()?;
            return Ok(ExitReport::detached(native.pid()));
        }
        let settled = settle(&handle, options.timeout).await?;
        Ok(ExitReport::from_handle(&handle, matches!(settled, Settled::TimedOut)))
    }

    /// Adopt a running process and wait for it
    pub async fn attach(&self, pid: u32, timeout: Option<Duration>) -> Result<ExitReport> {
        let handle = ProcessHandle::attach(&self.executor, pid)?;
        let settled = settle(&handle, timeout).await?;
        if matches!(settled, Settled::Unobservable) {
            info!("Process {} exited; it is not our child so its status is unknown", pid);
        }
        Ok(ExitReport::from_handle(&handle, matches!(settled, Settled::TimedOut)))
    }

    /// Deliver one request to `pid`.
    ///
    /// Interrupt and exit requests detach afterwards so the process is not
    /// killed when the handle goes away. `Terminate` blocks until the exit is
    /// seen, in `block_in_place`, so this must run on a multi-threaded runtime.
    pub fn signal(&self, pid: u32, kind: SignalKind) -> Result<ExitReport> {
        let handle = ProcessHandle::attach(&self.executor, pid)?;
        match kind {
            SignalKind::Interrupt => handle.interrupt()?,
            SignalKind::RequestExit => handle.request_exit()?,
            SignalKind::Terminate => {
                let outcome = tokio::task::block_in_place(|| handle.terminate());
                observed(&handle, outcome)?;
                return Ok(ExitReport::from_handle(&handle, false));
            }
        }
        debug!("Sent {:?} to process {}", kind, pid);
        let native = handle.detach()?;
        Ok(ExitReport::detached(native.pid()))
    }
}

/// Await exit through the async bridge, terminating on timeout
async fn settle(handle: &ProcessHandle, timeout: Option<Duration>) -> Result<Settled> {
    let Some(limit) = timeout else {
        return observed(handle, handle.wait_exit().await.map(drop));
    };
    match tokio::time::timeout(limit, handle.wait_exit()).await {
        Ok(outcome) => observed(handle, outcome.map(drop)),
        Err(_) => {
            warn!(
                "Process {} still running after {:?}; terminating",
                handle.id(),
                limit
            );
            let outcome = tokio::task::block_in_place(|| handle.terminate());
            observed(handle, outcome)?;
            Ok(Settled::TimedOut)
        }
    }
}

/// Accept a wait error when the process is simply gone
fn observed(handle: &ProcessHandle, outcome: coproc_core::Result<()>) -> Result<Settled> {
    match outcome {
        Ok(()) => Ok(Settled::Exited),
        Err(CoreError::WaitError(msg)) if matches!(handle.running(), Ok(false)) => {
            debug!("Process {}: {}", handle.id(), msg);
            Ok(Settled::Unobservable)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coproc_core::process::MockProcessSys;
    use std::io::Write;
    use std::sync::Arc;

    fn report() -> ExitReport {
        ExitReport {
            pid: 12,
            exit_code: Some(9),
            status: Some("killed by SIGKILL".to_string()),
            signal: Some("SIGKILL".to_string()),
            timed_out: true,
            detached: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminate_non_child_reports_unknown_status() {
        let sys = Arc::new(MockProcessSys::new(4242).foreign());
        let executor = Executor::current()
            .with_sys(sys.clone())
            .with_settings(Settings {
                attach_poll_interval_ms: 1,
            });
        let report = Runner::new(executor)
            .signal(4242, SignalKind::Terminate)
            .unwrap();

        let sent: Vec<&str> = sys.signals().iter().map(|signal| signal.as_str()).collect();
        assert_eq!(sent, vec!["SIGKILL"]);
        assert_eq!(report.exit_code, None);
        assert!(!report.detached);
        assert_eq!(
            report.render(false).unwrap(),
            "process 4242: exit status unknown"
        );
    }

    #[test]
    fn test_render_text() {
        assert_eq!(
            report().render(false).unwrap(),
            "process 12: killed by SIGKILL (timed out)"
        );
        assert_eq!(
            ExitReport::detached(5).render(false).unwrap(),
            "process 5 detached"
        );
    }

    #[test]
    fn test_render_json() {
        let json: serde_json::Value =
            serde_json::from_str(&report().render(true).unwrap()).unwrap();
        assert_eq!(json["pid"], 12);
        assert_eq!(json["exitCode"], 9);
        assert_eq!(json["signal"], "SIGKILL");
        assert_eq!(json["timedOut"], true);
        assert_eq!(json["detached"], false);
    }

    #[test]
    fn test_resolve_requires_a_command() {
        let err = Runner::resolve_launch(&RunOptions::default()).unwrap_err();
        assert_eq!(err.code(), "CLI002");
    }

    #[test]
    fn test_command_line_overrides_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[settings]
attachPollIntervalMs = 5

[launch]
command = "sh"
args = ["-c", "exit 4"]
stdout = "null"
"#
        )
        .unwrap();

        let options = RunOptions {
            config: Some(file.path().to_path_buf()),
            command: vec!["true".to_string()],
            ..RunOptions::default()
        };
        let (spec, settings) = Runner::resolve_launch(&options).unwrap();
        assert_eq!(spec.command, "true");
        assert!(spec.args.is_empty());
        assert_eq!(spec.stdout, coproc_core::StdioMode::Null);
        assert_eq!(settings.attach_poll_interval_ms, 5);
    }

    #[test]
    fn test_bad_config_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[settings]\nattachPollIntervalMs = 0\n").unwrap();
        let options = RunOptions {
            config: Some(file.path().to_path_buf()),
            ..RunOptions::default()
        };
        let err = Runner::resolve_launch(&options).unwrap_err();
        assert_eq!(err.code(), "CLI003");
    }
}
