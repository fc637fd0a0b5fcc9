//! Exit waits as futures
//!
//! [`ExitWait`] turns one [`ProcessHandle::async_wait`] registration into a
//! suspension point. The protocol has three phases:
//!
//! 1. The first poll never produces a result, even when the exit is already
//!    known. After registering it wakes itself and returns `Pending`, so the
//!    task always goes back through the executor before resuming.
//! 2. Registration sends the completion into a `oneshot` channel. If
//!    registration fails synchronously the future completes on that same
//!    poll with the captured failure.
//! 3. A later poll reads the channel and hands the outcome to the
//!    [`ExitMode`], which decides how errors surface.
//!
//! The channel is heap allocated and independent of the caller's frame.
//! Dropping a suspended `ExitWait` withdraws its registration; the blocking
//! waiter behind it keeps running and serves the next exit wait on the same
//! handle, so a timed-out wait can simply be retried.

use super::exit::NativeExitCode;
use super::handle::ProcessHandle;
use crate::{CoreError, ErrorSlot, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// How an [`ExitWait`] surfaces its outcome
pub trait ExitMode {
    type Output;

    /// The completion delivered `outcome`
    fn resume(&mut self, outcome: Result<NativeExitCode>) -> Self::Output;

    /// `async_wait` refused the registration
    fn registration_failed(&mut self, error: CoreError) -> Self::Output;
}

/// Errors are returned to the caller
#[derive(Clone, Copy, Debug, Default)]
pub struct Propagate;

impl ExitMode for Propagate {
    type Output = Result<i32>;

    fn resume(&mut self, outcome: Result<NativeExitCode>) -> Result<i32> {
        outcome.map(NativeExitCode::portable)
    }

    fn registration_failed(&mut self, error: CoreError) -> Result<i32> {
        Err(error)
    }
}

/// Errors are written into a caller-owned slot; the output is `-1` on failure
#[derive(Debug)]
pub struct Report<'s> {
    slot: &'s mut ErrorSlot,
}

impl<'s> Report<'s> {
    pub fn new(slot: &'s mut ErrorSlot) -> Self {
        Self { slot }
    }
}

impl ExitMode for Report<'_> {
    type Output = i32;

    fn resume(&mut self, outcome: Result<NativeExitCode>) -> i32 {
        self.slot.report(outcome.map(NativeExitCode::portable), -1)
    }

    fn registration_failed(&mut self, error: CoreError) -> i32 {
        // Registration only fails on caller misuse, which the slot does not cover.
        panic!("exit wait could not be registered: {}", error)
    }
}

enum Phase {
    Unregistered,
    Suspended {
        id: u64,
        rx: oneshot::Receiver<Result<NativeExitCode>>,
    },
    Finished,
}

/// Future resolving when the process behind a handle exits
#[must_use = "futures do nothing unless polled"]
pub struct ExitWait<'a, M: ExitMode> {
    process: &'a ProcessHandle,
    mode: M,
    phase: Phase,
}

impl<'a, M: ExitMode> ExitWait<'a, M> {
    pub(crate) fn new(process: &'a ProcessHandle, mode: M) -> Self {
        Self {
            process,
            mode,
            phase: Phase::Unregistered,
        }
    }
}

impl<M: ExitMode + Unpin> Future for ExitWait<'_, M> {
    type Output = M::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.phase, Phase::Finished) {
            Phase::Unregistered => {
                let (tx, rx) = oneshot::channel();
                let registered = this.process.register_exit_wait(move |outcome| {
                    let _ = tx.send(outcome);
                });
                match registered {
                    Ok(id) => {
                        this.phase = Phase::Suspended { id, rx };
                        cx.waker().wake_by_ref();
                        Poll::Pending
                    }
                    Err(error) => Poll::Ready(this.mode.registration_failed(error)),
                }
            }
            Phase::Suspended { id, mut rx } => match Pin::new(&mut rx).poll(cx) {
                Poll::Pending => {
                    this.phase = Phase::Suspended { id, rx };
                    Poll::Pending
                }
                Poll::Ready(Ok(outcome)) => Poll::Ready(this.mode.resume(outcome)),
                Poll::Ready(Err(_)) => Poll::Ready(this.mode.resume(Err(CoreError::WaitError(
                    "the executor dropped the exit notification".to_string(),
                )))),
            },
            Phase::Finished => panic!("ExitWait polled after completion"),
        }
    }
}

impl<M: ExitMode> Drop for ExitWait<'_, M> {
    fn drop(&mut self) {
        if let Phase::Suspended { id, .. } = self.phase {
            self.process.cancel_exit_wait(id);
        }
    }
}
