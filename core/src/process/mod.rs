//! Process handles for the coproc core library
//!
//! This module provides owned child-process handles with a drop policy that
//! prevents leaks, blocking and `async` exit waits, and best-effort signals.
//!
//! ## Platform Support
//!
//! - **Unix**: `waitpid(2)` for exit observation, `kill(2)` for signals
//!
//! ## Layout
//!
//! - [`ProcessHandle`]: spawn, attach, signal, wait, detach
//! - [`ExitWait`]: the future behind `wait_exit()`
//! - [`Executor`]: runtime, OS backend and settings shared by handles
//! - [`ProcessSys`]: the OS seam, with a scripted [`MockProcessSys`]

pub mod args;
pub mod executor;
pub mod exit;
pub mod handle;
pub mod native;
mod state;
pub mod sys;
pub mod wait;

pub use args::{ProcessArgs, ProcessStdio};
pub use executor::Executor;
pub use exit::NativeExitCode;
pub use handle::ProcessHandle;
pub use native::{NativeProcess, OwnershipMode};
pub use sys::{MockProcessSys, ProcessSys, SignalResponse, UnixSys};
pub use wait::{ExitMode, ExitWait, Propagate, Report};
