//! Owned process handles
//!
//! [`ProcessHandle`] is the single point of truth for one child process: its
//! pid, whether it has exited, and what happens when the handle goes away.
//!
//! ## Drop policy
//!
//! Unless the handle was detached, dropping it while the process is still
//! running sends `SIGKILL` without waiting for the process to die. Reaping is
//! handed to the executor's blocking pool so the pid does not linger as a
//! zombie. Failures at drop time are logged and swallowed.
//!
//! ## Error conventions
//!
//! Every fallible operation has a propagating form returning
//! [`Result`](crate::Result) and a reporting `*_into` form writing into a
//! caller-owned [`ErrorSlot`]. Both run the same code.

use super::args::ProcessArgs;
use super::executor::Executor;
use super::exit::NativeExitCode;
use super::native::{NativeProcess, OwnershipMode};
use super::state::{Observed, ProcessState};
use super::wait::{ExitWait, Propagate, Report};
use crate::{CoreError, ErrorSlot, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A child process managed from a tokio runtime
#[derive(Debug)]
pub struct ProcessHandle {
    executor: Executor,
    /// `None` for invalid handles
    state: Option<Arc<ProcessState>>,
    /// The `std` child of spawned processes, kept for its stdio pipes
    child: Option<Child>,
    ownership: OwnershipMode,
}

impl ProcessHandle {
    /// Launch `exe` with `args` and own the resulting process.
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use coproc_core::process::{Executor, ProcessArgs, ProcessHandle};
    ///
    /// # async fn run() -> coproc_core::Result<()> {
    /// let executor = Executor::current();
    /// let child = ProcessHandle::spawn(&executor, "sh", ["-c", "exit 3"], ProcessArgs::new())?;
    /// assert_eq!(child.wait_exit().await?, 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn<I, S>(
        executor: &Executor,
        exe: impl AsRef<Path>,
        args: I,
        config: ProcessArgs,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let exe = exe.as_ref();
        let mut command = Command::new(exe);
        command.args(args);
        debug!("Spawning process: {:?}", command);
        config.apply(&mut command);

        let child = command.spawn().map_err(|e| {
            error!("Failed to spawn process '{}': {}", exe.display(), e);
            CoreError::SpawnError(format!("Failed to spawn '{}': {}", exe.display(), e))
        })?;
        let pid = Pid::from_raw(child.id() as i32);
        info!("Spawned process {} ({})", pid, exe.display());

        Ok(Self {
            state: Some(Self::new_state(executor, pid, false, None)),
            executor: executor.clone(),
            child: Some(child),
            ownership: OwnershipMode::Owned,
        })
    }

    /// Reporting form of [`spawn`](Self::spawn); yields an invalid handle on failure
    pub fn spawn_into<I, S>(
        executor: &Executor,
        exe: impl AsRef<Path>,
        args: I,
        config: ProcessArgs,
        slot: &mut ErrorSlot,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        match Self::spawn(executor, exe, args, config) {
            Ok(handle) => {
                slot.clear();
                handle
            }
            Err(e) => {
                slot.set(e);
                Self::invalid(executor)
            }
        }
    }

    /// Adopt an existing process by pid.
    ///
    /// Fails with [`CoreError::InvalidPid`] when the pid is out of range, names
    /// the current process, or does not exist.
    pub fn attach(executor: &Executor, pid: u32) -> Result<Self> {
        Self::attach_native(executor, NativeProcess::from_pid(pid))
    }

    /// Reporting form of [`attach`](Self::attach); yields an invalid handle on failure
    pub fn attach_into(executor: &Executor, pid: u32, slot: &mut ErrorSlot) -> Self {
        match Self::attach(executor, pid) {
            Ok(handle) => {
                slot.clear();
                handle
            }
            Err(e) => {
                slot.set(e);
                Self::invalid(executor)
            }
        }
    }

    /// Adopt a process together with its native handle
    pub fn attach_native(executor: &Executor, native: NativeProcess) -> Result<Self> {
        let (pid, child, exit) = native.into_parts();
        let raw = pid.as_raw();
        if raw <= 0 {
            return Err(CoreError::InvalidPid(raw));
        }
        if pid == Pid::this() {
            warn!("Refusing to attach to the current process {}", pid);
            return Err(CoreError::InvalidPid(raw));
        }
        // With a known exit code the pid may already be reaped; nothing to probe.
        if exit.is_none() {
            match executor.sys().kill(pid, None) {
                Ok(()) | Err(Errno::EPERM) => {}
                Err(e) => {
                    debug!("Cannot attach to process {}: {}", pid, e);
                    return Err(CoreError::InvalidPid(raw));
                }
            }
        }
        debug!("Attached to process {}", pid);

        Ok(Self {
            state: Some(Self::new_state(executor, pid, true, exit)),
            executor: executor.clone(),
            child,
            ownership: OwnershipMode::Attached,
        })
    }

    /// An empty placeholder, to be replaced by assignment later
    pub fn invalid(executor: &Executor) -> Self {
        Self {
            executor: executor.clone(),
            state: None,
            child: None,
            ownership: OwnershipMode::Owned,
        }
    }

    fn new_state(
        executor: &Executor,
        pid: Pid,
        attached: bool,
        exit: Option<NativeExitCode>,
    ) -> Arc<ProcessState> {
        Arc::new(ProcessState::new(
            pid,
            attached,
            Arc::clone(executor.sys()),
            executor.settings().attach_poll_interval(),
            exit,
        ))
    }

    fn state(&self) -> Result<&Arc<ProcessState>> {
        self.state.as_ref().ok_or_else(|| {
            CoreError::MisuseError("operation on an invalid process handle".to_string())
        })
    }

    /// Ask the process to interrupt (`SIGINT`). It may ignore the request.
    pub fn interrupt(&self) -> Result<()> {
        self.state()?.signal(Signal::SIGINT)
    }

    /// Reporting form of [`interrupt`](Self::interrupt)
    pub fn interrupt_into(&self, slot: &mut ErrorSlot) {
        slot.report(self.interrupt(), ())
    }

    /// Ask the process to shut down gracefully (`SIGTERM`). It may ignore the request.
    pub fn request_exit(&self) -> Result<()> {
        self.state()?.signal(Signal::SIGTERM)
    }

    /// Reporting form of [`request_exit`](Self::request_exit)
    pub fn request_exit_into(&self, slot: &mut ErrorSlot) {
        slot.report(self.request_exit(), ())
    }

    /// Kill the process (`SIGKILL`) and block until its exit is recorded.
    ///
    /// Returns immediately when the exit is already known.
    pub fn terminate(&self) -> Result<()> {
        let state = self.state()?;
        if state.exit().is_some() {
            return Ok(());
        }
        state.signal(Signal::SIGKILL)?;
        state.wait().map(|code| {
            info!("Process {} terminated: {}", state.pid(), code);
        })
    }

    /// Reporting form of [`terminate`](Self::terminate)
    pub fn terminate_into(&self, slot: &mut ErrorSlot) {
        slot.report(self.terminate(), ())
    }

    /// Block until the process exits and return its portable exit code.
    ///
    /// A recorded exit is returned without asking the OS again. This blocks
    /// the calling thread; from async code use [`wait_exit`](Self::wait_exit).
    pub fn wait(&self) -> Result<i32> {
        Ok(self.state()?.wait()?.portable())
    }

    /// Reporting form of [`wait`](Self::wait); returns `-1` on failure
    pub fn wait_into(&self, slot: &mut ErrorSlot) -> i32 {
        slot.report(self.wait(), -1)
    }

    /// Register a one-shot completion for process exit.
    ///
    /// The completion runs at most once, on the executor's blocking pool and
    /// never inline on the caller's stack. The exit is recorded in the handle
    /// before the completion sees it. Only one registration may be outstanding
    /// per handle; a second one fails with [`CoreError::MisuseError`].
    pub fn async_wait<F>(&self, completion: F) -> Result<()>
    where
        F: FnOnce(Result<NativeExitCode>) + Send + 'static,
    {
        self.register_exit_wait(completion).map(drop)
    }

    /// `async_wait` returning the registration id, so the bridge can withdraw it
    pub(crate) fn register_exit_wait<F>(&self, completion: F) -> Result<u64>
    where
        F: FnOnce(Result<NativeExitCode>) + Send + 'static,
    {
        let state = self.state()?;
        let (id, start) = state.register(Box::new(completion))?;
        debug!("Registered exit wait {} for process {}", id, state.pid());
        if start {
            let state = Arc::clone(state);
            drop(
                self.executor
                    .runtime()
                    .spawn_blocking(move || state.run_waiter()),
            );
        }
        Ok(id)
    }

    /// Withdraw an undelivered registration; the blocking waiter keeps running
    pub(crate) fn cancel_exit_wait(&self, id: u64) {
        if let Some(state) = &self.state {
            if state.cancel(id) {
                debug!("Withdrew exit wait {} for process {}", id, state.pid());
            }
        }
    }

    /// Suspend until the process exits; errors are returned.
    pub fn wait_exit(&self) -> ExitWait<'_, Propagate> {
        ExitWait::new(self, Propagate)
    }

    /// Suspend until the process exits; errors are written into `slot`.
    ///
    /// # Panics
    ///
    /// The returned future panics if the wait cannot be registered at all
    /// (invalid handle, or another exit wait outstanding).
    pub fn wait_exit_into<'a>(&'a self, slot: &'a mut ErrorSlot) -> ExitWait<'a, Report<'a>> {
        ExitWait::new(self, Report::new(slot))
    }

    /// Give up ownership: the process keeps running after this handle is gone.
    pub fn detach(mut self) -> Result<NativeProcess> {
        let state = self.state.take().ok_or_else(|| {
            CoreError::MisuseError("cannot detach an invalid process handle".to_string())
        })?;
        self.ownership = OwnershipMode::Detached;
        debug!("Detached process {}", state.pid());
        Ok(NativeProcess::from_parts(
            state.pid(),
            self.child.take(),
            state.exit(),
        ))
    }

    /// Non-blocking liveness check; records the exit code when it observes exit
    pub fn running(&self) -> Result<bool> {
        Ok(self.state()?.observe(false)? == Observed::Running)
    }

    /// Reporting form of [`running`](Self::running); returns `false` on failure
    pub fn running_into(&self, slot: &mut ErrorSlot) -> bool {
        slot.report(self.running(), false)
    }

    /// Whether the handle refers to a process (which may have exited)
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Process id; `0` for an invalid handle
    pub fn id(&self) -> u32 {
        self.state
            .as_ref()
            .map_or(0, |state| state.pid().as_raw() as u32)
    }

    /// Portable exit code, once the exit has been observed
    pub fn exit_code(&self) -> Option<i32> {
        self.native_exit_code().map(NativeExitCode::portable)
    }

    /// Raw wait status, once the exit has been observed
    pub fn native_exit_code(&self) -> Option<NativeExitCode> {
        self.state.as_ref().and_then(|state| state.exit())
    }

    pub fn ownership(&self) -> OwnershipMode {
        self.ownership
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Take the piped stdin, if available
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.as_mut().and_then(|c| c.stdin.take())
    }

    /// Take the piped stdout, if available
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    /// Take the piped stderr, if available
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.as_mut().and_then(|c| c.stderr.take())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.ownership == OwnershipMode::Detached {
            return;
        }
        let Some(state) = self.state.take() else {
            return;
        };

        match state.observe(false) {
            Ok(Observed::Running) => {}
            Ok(_) => return,
            Err(e) => {
                debug!("Not terminating process {} on drop: {}", state.pid(), e);
                return;
            }
        }

        info!("Killing process {} on drop", state.pid());
        if let Err(e) = state.signal(Signal::SIGKILL) {
            warn!("Drop-time kill of process {} failed: {}", state.pid(), e);
            return;
        }
        // A blocking waiter already in flight reaps the child itself.
        if !state.waiter_running() {
            drop(self.executor.runtime().spawn_blocking(move || {
                if let Err(e) = state.wait() {
                    debug!("Background reap of process {} failed: {}", state.pid(), e);
                }
            }));
        }
    }
}
