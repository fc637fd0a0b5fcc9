//! Shared per-process state
//!
//! A [`ProcessHandle`](super::ProcessHandle) and any outstanding `async_wait`
//! completion share one [`ProcessState`]. It owns the exit cache and the rules
//! for observing exit when several waiters race for the same child.

use super::exit::NativeExitCode;
use super::sys::ProcessSys;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How long an `ECHILD` loser sleeps between checks for the winner's record
const HANDOFF_PAUSE: Duration = Duration::from_millis(1);

/// What a single observation found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Observed {
    Running,
    Exited(NativeExitCode),
    /// A non-child process disappeared; its status is unknowable
    Vanished,
}

/// Callback registered through `async_wait`
pub(crate) type Completion = Box<dyn FnOnce(Result<NativeExitCode>) + Send>;

/// The single registration slot and the blocking waiter serving it.
///
/// The waiter outlives registrations: a withdrawn registration leaves it
/// running, and the next registration is handed to it instead of starting
/// another one.
#[derive(Default)]
struct Waiters {
    next_id: u64,
    slot: Option<(u64, Completion)>,
    running: bool,
}

impl fmt::Debug for Waiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiters")
            .field("registered", &self.slot.as_ref().map(|(id, _)| *id))
            .field("running", &self.running)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct ProcessState {
    pid: Pid,
    /// Attached handles may watch processes that are not our children
    attached: bool,
    sys: Arc<dyn ProcessSys>,
    poll_interval: Duration,
    exit: OnceLock<NativeExitCode>,
    /// Threads currently inside `waitpid` for this pid
    reapers: AtomicUsize,
    vanished: AtomicBool,
    waiters: Mutex<Waiters>,
}

impl ProcessState {
    pub(crate) fn new(
        pid: Pid,
        attached: bool,
        sys: Arc<dyn ProcessSys>,
        poll_interval: Duration,
        exit: Option<NativeExitCode>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(code) = exit {
            let _ = cell.set(code);
        }
        Self {
            pid,
            attached,
            sys,
            poll_interval,
            exit: cell,
            reapers: AtomicUsize::new(0),
            vanished: AtomicBool::new(false),
            waiters: Mutex::new(Waiters::default()),
        }
    }

    pub(crate) fn pid(&self) -> Pid {
        self.pid
    }

    pub(crate) fn exit(&self) -> Option<NativeExitCode> {
        self.exit.get().copied()
    }

    /// Put `completion` in the registration slot.
    ///
    /// Returns the registration id and whether the caller must start the
    /// blocking waiter. Fails with `MisuseError` while another registration
    /// is outstanding.
    pub(crate) fn register(&self, completion: Completion) -> Result<(u64, bool)> {
        let mut waiters = self.lock_waiters();
        if waiters.slot.is_some() {
            return Err(CoreError::MisuseError(format!(
                "an exit wait is already outstanding on process {}",
                self.pid
            )));
        }
        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.slot = Some((id, completion));
        let start = !waiters.running;
        waiters.running = true;
        Ok((id, start))
    }

    /// Withdraw registration `id` if it has not been delivered yet
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let mut waiters = self.lock_waiters();
        let registered = waiters
            .slot
            .as_ref()
            .is_some_and(|(registered, _)| *registered == id);
        if registered {
            waiters.slot = None;
        }
        registered
    }

    /// Whether a blocking waiter is in flight; it reaps the process itself
    pub(crate) fn waiter_running(&self) -> bool {
        self.lock_waiters().running
    }

    /// Body of the blocking waiter: wait for exit, then deliver to whoever is registered
    pub(crate) fn run_waiter(&self) {
        let outcome = self.wait();
        let registered = {
            let mut waiters = self.lock_waiters();
            waiters.running = false;
            waiters.slot.take()
        };
        match registered {
            Some((_, completion)) => completion(outcome),
            None => debug!("Exit of process {} observed with no wait registered", self.pid),
        }
    }

    fn lock_waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocking wait for exit
    pub(crate) fn wait(&self) -> Result<NativeExitCode> {
        match self.observe(true)? {
            Observed::Exited(code) => Ok(code),
            Observed::Vanished => Err(CoreError::WaitError(format!(
                "process {} exited but is not a child of this process; its exit status is not observable",
                self.pid
            ))),
            Observed::Running => Err(CoreError::WaitError(format!(
                "blocking wait on process {} returned while it was still running",
                self.pid
            ))),
        }
    }

    /// Observe the process, blocking until exit when `block` is set
    pub(crate) fn observe(&self, block: bool) -> Result<Observed> {
        if let Some(code) = self.exit() {
            return Ok(Observed::Exited(code));
        }
        if self.vanished.load(Ordering::Acquire) {
            return Ok(Observed::Vanished);
        }

        let options = if block { None } else { Some(WaitPidFlag::WNOHANG) };
        self.reapers.fetch_add(1, Ordering::AcqRel);
        let outcome = loop {
            match self.sys.waitpid(self.pid, options) {
                Ok(WaitStatus::StillAlive) => break Ok(None),
                Ok(status) => match NativeExitCode::from_wait_status(status) {
                    Some(code) => break Ok(Some(self.record(code))),
                    None => continue,
                },
                Err(Errno::EINTR) => continue,
                Err(e) => break Err(e),
            }
        };
        // The exit is recorded before this thread stops counting as a reaper.
        self.reapers.fetch_sub(1, Ordering::AcqRel);

        match outcome {
            Ok(Some(code)) => Ok(Observed::Exited(code)),
            Ok(None) => Ok(Observed::Running),
            Err(Errno::ECHILD) => self.reaped_elsewhere(block),
            Err(e) => {
                warn!("waitpid({}) failed: {}", self.pid, e);
                Err(CoreError::WaitError(format!(
                    "waitpid({}) failed: {}",
                    self.pid, e
                )))
            }
        }
    }

    /// Send `signal`, refusing once exit has been observed since the pid may be reused
    pub(crate) fn signal(&self, signal: Signal) -> Result<()> {
        if self.exit().is_some() || self.vanished.load(Ordering::Acquire) {
            return Err(CoreError::SignalDeliveryError(format!(
                "cannot send {} to process {}: it already exited",
                signal, self.pid
            )));
        }
        debug!("Sending {} to process {}", signal, self.pid);
        self.sys.kill(self.pid, Some(signal)).map_err(|e| {
            debug!("Failed to send {} to process {}: {}", signal, self.pid, e);
            CoreError::SignalDeliveryError(format!(
                "Failed to send {} to process {}: {}",
                signal, self.pid, e
            ))
        })
    }

    fn record(&self, code: NativeExitCode) -> NativeExitCode {
        let code = *self.exit.get_or_init(|| code);
        debug!("Process {} exited: {}", self.pid, code);
        code
    }

    /// `waitpid` said `ECHILD`: another waiter on this handle may have won the
    /// race, or the process is not our child.
    fn reaped_elsewhere(&self, block: bool) -> Result<Observed> {
        while self.exit().is_none() && self.reapers.load(Ordering::Acquire) > 0 {
            thread::sleep(HANDOFF_PAUSE);
        }
        if let Some(code) = self.exit() {
            return Ok(Observed::Exited(code));
        }
        if !self.attached {
            return Err(CoreError::WaitError(format!(
                "process {} was reaped outside this handle",
                self.pid
            )));
        }
        self.watch_foreign(block)
    }

    /// Liveness polling for attached processes we cannot `waitpid`
    fn watch_foreign(&self, block: bool) -> Result<Observed> {
        loop {
            if self.vanished.load(Ordering::Acquire) {
                return Ok(Observed::Vanished);
            }
            match self.sys.kill(self.pid, None) {
                Ok(()) | Err(Errno::EPERM) => {}
                Err(Errno::ESRCH) => {
                    debug!("Attached process {} is gone", self.pid);
                    self.vanished.store(true, Ordering::Release);
                    return Ok(Observed::Vanished);
                }
                Err(e) => {
                    return Err(CoreError::WaitError(format!(
                        "failed to probe process {}: {}",
                        self.pid, e
                    )))
                }
            }
            if !block {
                return Ok(Observed::Running);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::sys::MockProcessSys;

    fn state(sys: &Arc<MockProcessSys>, attached: bool) -> ProcessState {
        let dyn_sys: Arc<dyn ProcessSys> = sys.clone();
        ProcessState::new(
            Pid::from_raw(4242),
            attached,
            dyn_sys,
            Duration::from_millis(1),
            None,
        )
    }

    #[test]
    fn test_observe_records_exit_once() {
        let sys = Arc::new(MockProcessSys::new(4242));
        let st = state(&sys, false);
        assert_eq!(st.observe(false).unwrap(), Observed::Running);

        sys.exit_with(7);
        assert_eq!(st.observe(false).unwrap(), Observed::Exited(NativeExitCode::exited(7)));
        let calls = sys.wait_calls();

        assert_eq!(st.wait().unwrap().portable(), 7);
        assert_eq!(sys.wait_calls(), calls);
    }

    #[test]
    fn test_concurrent_waiters_share_the_status() {
        let sys = Arc::new(MockProcessSys::new(4242));
        let st = Arc::new(state(&sys, false));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let st = Arc::clone(&st);
                thread::spawn(move || st.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        sys.exit_with(3);

        for waiter in waiters {
            let code = waiter.join().expect("join").expect("wait");
            assert_eq!(code.portable(), 3);
        }
    }

    #[test]
    fn test_owned_echild_is_wait_error() {
        let sys = Arc::new(MockProcessSys::new(4242).foreign());
        let st = state(&sys, false);
        let err = st.wait().unwrap_err();
        assert!(matches!(err, CoreError::WaitError(_)));
    }

    #[test]
    fn test_attached_foreign_process_vanishes() {
        let sys = Arc::new(MockProcessSys::new(4242).foreign());
        let st = state(&sys, true);
        assert_eq!(st.observe(false).unwrap(), Observed::Running);

        sys.exit_with(0);
        assert_eq!(st.observe(false).unwrap(), Observed::Vanished);
        assert!(matches!(st.wait(), Err(CoreError::WaitError(_))));
        assert!(matches!(
            st.signal(Signal::SIGTERM),
            Err(CoreError::SignalDeliveryError(_))
        ));
    }

    #[test]
    fn test_signal_refused_after_exit() {
        let sys = Arc::new(MockProcessSys::new(4242));
        let st = state(&sys, false);
        sys.exit_with(0);
        st.wait().unwrap();

        let err = st.signal(Signal::SIGINT).unwrap_err();
        assert!(err.to_string().contains("already exited"));
        assert!(sys.signals().is_empty());
    }

    #[test]
    fn test_registration_slot_is_exclusive() {
        let sys = Arc::new(MockProcessSys::new(4242));
        let st = state(&sys, false);
        let (first, start) = st.register(Box::new(|_| {})).unwrap();
        assert!(start);
        assert!(st.register(Box::new(|_| {})).unwrap_err().is_misuse());

        assert!(st.cancel(first));
        assert!(!st.cancel(first));
        // The waiter is still considered in flight, so it is not started twice.
        let (second, start) = st.register(Box::new(|_| {})).unwrap();
        assert_ne!(first, second);
        assert!(!start);
        assert!(st.waiter_running());
    }

    #[test]
    fn test_waiter_delivers_to_latest_registration() {
        let sys = Arc::new(MockProcessSys::new(4242));
        let st = Arc::new(state(&sys, false));
        let (first, _) = st.register(Box::new(|_| panic!("withdrawn"))).unwrap();
        let waiter = {
            let st = Arc::clone(&st);
            thread::spawn(move || st.run_waiter())
        };
        st.cancel(first);

        let (tx, rx) = std::sync::mpsc::channel();
        st.register(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }))
        .unwrap();
        sys.exit_with(8);
        waiter.join().expect("join");

        let outcome = rx.recv().expect("delivered");
        assert_eq!(outcome.unwrap().portable(), 8);
        assert!(!st.waiter_running());
        assert_eq!(sys.wait_calls(), 1);
    }
}
