//! OS backends for process observation and signalling
//!
//! Everything a [`ProcessHandle`](super::ProcessHandle) asks of the kernel
//! after spawn goes through [`ProcessSys`]: `waitpid(2)` and `kill(2)`. The
//! real backend is [`UnixSys`]; [`MockProcessSys`] scripts a single process
//! so the handle's state machine can be tested without real children, and
//! counts calls so tests can prove a cached exit code never hits the OS.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Kernel operations used to observe and signal a process
pub trait ProcessSys: Send + Sync + fmt::Debug {
    /// `waitpid(2)` on a single pid
    fn waitpid(&self, pid: Pid, options: Option<WaitPidFlag>) -> nix::Result<WaitStatus>;

    /// `kill(2)`; `None` probes for existence without sending anything
    fn kill(&self, pid: Pid, signal: Option<Signal>) -> nix::Result<()>;
}

/// The real Unix backend
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixSys;

impl ProcessSys for UnixSys {
    fn waitpid(&self, pid: Pid, options: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
        wait::waitpid(pid, options)
    }

    fn kill(&self, pid: Pid, signal: Option<Signal>) -> nix::Result<()> {
        signal::kill(pid, signal)
    }
}

/// How the scripted process reacts to a signal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalResponse {
    /// The signal is recorded and otherwise ignored
    Ignore,
    /// The process dies from the signal
    Die,
}

#[derive(Debug)]
struct MockState {
    alive: bool,
    reaped: bool,
    exit: WaitStatus,
    child: bool,
    wait_error: Option<Errno>,
    soft_signals: SignalResponse,
    signals: Vec<Option<Signal>>,
}

/// Scripted backend standing in for one process.
///
/// The process starts alive. [`exit_with`](Self::exit_with) makes it exit;
/// `SIGKILL` always kills it; `SIGINT`/`SIGTERM` follow the configured
/// [`SignalResponse`]. A blocking `waitpid` parks until the process exits.
#[derive(Debug)]
pub struct MockProcessSys {
    pid: Pid,
    state: Mutex<MockState>,
    exited: Condvar,
    waits: AtomicUsize,
    probes: AtomicUsize,
}

impl MockProcessSys {
    /// A live child process with the given pid
    pub fn new(pid: i32) -> Self {
        let pid = Pid::from_raw(pid);
        Self {
            pid,
            state: Mutex::new(MockState {
                alive: true,
                reaped: false,
                exit: WaitStatus::Exited(pid, 0),
                child: true,
                wait_error: None,
                soft_signals: SignalResponse::Ignore,
                signals: Vec::new(),
            }),
            exited: Condvar::new(),
            waits: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Make the process a non-child: `waitpid` fails with `ECHILD`
    pub fn foreign(self) -> Self {
        self.lock().child = false;
        self
    }

    /// Make every `waitpid` fail with `errno`
    pub fn failing_waits(self, errno: Errno) -> Self {
        self.lock().wait_error = Some(errno);
        self
    }

    /// Configure how `SIGINT`/`SIGTERM` are handled
    pub fn soft_signals(self, response: SignalResponse) -> Self {
        self.lock().soft_signals = response;
        self
    }

    /// Let the process exit with `code`
    pub fn exit_with(&self, code: i32) {
        let mut state = self.lock();
        state.exit = WaitStatus::Exited(self.pid, code);
        state.alive = false;
        self.exited.notify_all();
    }

    /// Whether the scripted process is still alive
    pub fn is_alive(&self) -> bool {
        self.lock().alive
    }

    /// Number of `waitpid` calls issued so far
    pub fn wait_calls(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    /// Number of existence probes (`kill` with no signal) issued so far
    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Signals delivered so far, in order
    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.iter().flatten().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn die(&self, state: &mut MockState, signal: Signal) {
        state.exit = WaitStatus::Signaled(self.pid, signal, false);
        state.alive = false;
        self.exited.notify_all();
    }
}

impl ProcessSys for MockProcessSys {
    fn waitpid(&self, pid: Pid, options: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        if pid != self.pid {
            return Err(Errno::ECHILD);
        }
        let mut state = self.lock();
        if let Some(errno) = state.wait_error {
            return Err(errno);
        }
        let nohang = options.is_some_and(|flags| flags.contains(WaitPidFlag::WNOHANG));
        loop {
            if !state.child || state.reaped {
                return Err(Errno::ECHILD);
            }
            if !state.alive {
                state.reaped = true;
                return Ok(state.exit);
            }
            if nohang {
                return Ok(WaitStatus::StillAlive);
            }
            state = self
                .exited
                .wait_timeout(state, Duration::from_millis(50))
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn kill(&self, pid: Pid, signal: Option<Signal>) -> nix::Result<()> {
        if pid != self.pid {
            return Err(Errno::ESRCH);
        }
        let mut state = self.lock();
        // A child that exited stays signalable as a zombie until reaped.
        let gone = if state.child { state.reaped } else { !state.alive };
        if signal.is_none() {
            self.probes.fetch_add(1, Ordering::SeqCst);
        }
        if gone {
            return Err(Errno::ESRCH);
        }
        state.signals.push(signal);
        match signal {
            Some(Signal::SIGKILL) if state.alive => self.die(&mut state, Signal::SIGKILL),
            Some(sig @ (Signal::SIGINT | Signal::SIGTERM))
                if state.alive && state.soft_signals == SignalResponse::Die =>
            {
                self.die(&mut state, sig)
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_nohang_reports_still_alive() {
        let sys = MockProcessSys::new(4242);
        let status = sys
            .waitpid(Pid::from_raw(4242), Some(WaitPidFlag::WNOHANG))
            .expect("waitpid");
        assert_eq!(status, WaitStatus::StillAlive);
        assert_eq!(sys.wait_calls(), 1);
    }

    #[test]
    fn test_mock_reaps_once() {
        let sys = MockProcessSys::new(4242);
        sys.exit_with(7);
        let pid = Pid::from_raw(4242);
        assert_eq!(sys.waitpid(pid, None), Ok(WaitStatus::Exited(pid, 7)));
        assert_eq!(sys.waitpid(pid, None), Err(Errno::ECHILD));
        assert_eq!(sys.kill(pid, None), Err(Errno::ESRCH));
    }

    #[test]
    fn test_mock_signal_responses() {
        let pid = Pid::from_raw(10);
        let stubborn = MockProcessSys::new(10);
        stubborn.kill(pid, Some(Signal::SIGINT)).expect("kill");
        assert!(stubborn.is_alive());

        let obedient = MockProcessSys::new(10).soft_signals(SignalResponse::Die);
        obedient.kill(pid, Some(Signal::SIGTERM)).expect("kill");
        assert!(!obedient.is_alive());
        assert_eq!(obedient.signals(), vec![Signal::SIGTERM]);
    }

    #[test]
    fn test_mock_foreign_process() {
        let pid = Pid::from_raw(77);
        let sys = MockProcessSys::new(77).foreign();
        assert_eq!(sys.waitpid(pid, None), Err(Errno::ECHILD));
        assert_eq!(sys.kill(pid, None), Ok(()));
        sys.exit_with(0);
        assert_eq!(sys.kill(pid, None), Err(Errno::ESRCH));
        assert_eq!(sys.probe_calls(), 2);
    }

    #[test]
    fn test_unix_sys_probe_current_process() {
        let me = Pid::this();
        assert!(UnixSys.kill(me, None).is_ok());
    }
}
