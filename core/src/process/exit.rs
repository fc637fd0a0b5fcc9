//! Native and portable exit codes
//!
//! The native form is the raw status word reported by `waitpid(2)`. The
//! portable form is what callers compare against: the exit status for a
//! normal exit, or the signal number for a process killed by a signal.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Raw wait status of an exited process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeExitCode(i32);

impl NativeExitCode {
    /// Wrap a raw status word as returned by `waitpid(2)`
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw status word
    pub const fn into_raw(self) -> i32 {
        self.0
    }

    /// Status of a process that called `exit(code)`
    pub const fn exited(code: i32) -> Self {
        Self((code & 0xff) << 8)
    }

    /// Status of a process terminated by `signal`
    pub const fn signaled(signal: Signal, core_dumped: bool) -> Self {
        let core = if core_dumped { 0x80 } else { 0 };
        Self(signal as i32 | core)
    }

    /// Build the native code for a terminal wait status.
    ///
    /// Returns `None` for non-terminal notifications (`StillAlive`, stop and
    /// continue events, ptrace events).
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::exited(code)),
            WaitStatus::Signaled(_, signal, core_dumped) => Some(Self::signaled(signal, core_dumped)),
            _ => None,
        }
    }

    /// Portable exit code: exit status for normal exits, signal number otherwise
    pub fn portable(self) -> i32 {
        if libc::WIFEXITED(self.0) {
            libc::WEXITSTATUS(self.0)
        } else if libc::WIFSIGNALED(self.0) {
            libc::WTERMSIG(self.0)
        } else {
            self.0
        }
    }

    /// Whether the process exited normally with status 0
    pub fn success(self) -> bool {
        libc::WIFEXITED(self.0) && libc::WEXITSTATUS(self.0) == 0
    }

    /// The terminating signal, if the process was killed by one
    pub fn signal(self) -> Option<Signal> {
        if libc::WIFSIGNALED(self.0) {
            Signal::try_from(libc::WTERMSIG(self.0)).ok()
        } else {
            None
        }
    }

    /// Whether a core dump was produced
    pub fn core_dumped(self) -> bool {
        libc::WIFSIGNALED(self.0) && libc::WCOREDUMP(self.0)
    }
}

impl From<NativeExitCode> for ExitStatus {
    fn from(code: NativeExitCode) -> Self {
        ExitStatus::from_raw(code.0)
    }
}

impl From<ExitStatus> for NativeExitCode {
    fn from(status: ExitStatus) -> Self {
        Self(status.into_raw())
    }
}

impl fmt::Display for NativeExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal() {
            Some(signal) => write!(f, "killed by {}", signal),
            None => write!(f, "exit status {}", self.portable()),
        }
    }
}
