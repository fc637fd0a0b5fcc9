//! Native process references

use super::exit::NativeExitCode;
use nix::unistd::Pid;
use std::process::Child;

/// Who is responsible for the process behind a handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipMode {
    /// Spawned by the handle; killed on drop while still running
    Owned,
    /// Adopted from an existing pid; killed on drop while still running
    Attached,
    /// Released with `detach`; drop leaves the process alone
    Detached,
}

/// Non-owning reference to a process.
///
/// Dropping a `NativeProcess` never signals or waits. It is what
/// [`ProcessHandle::detach`](super::ProcessHandle::detach) hands out and what
/// [`ProcessHandle::attach_native`](super::ProcessHandle::attach_native)
/// accepts, so an external registry can hold processes between handles.
#[derive(Debug)]
pub struct NativeProcess {
    pid: Pid,
    child: Option<Child>,
    exit: Option<NativeExitCode>,
}

impl NativeProcess {
    /// Reference a process by pid alone
    pub fn from_pid(pid: u32) -> Self {
        Self {
            pid: Pid::from_raw(pid as i32),
            child: None,
            exit: None,
        }
    }

    pub(crate) fn from_parts(pid: Pid, child: Option<Child>, exit: Option<NativeExitCode>) -> Self {
        Self { pid, child, exit }
    }

    pub(crate) fn into_parts(self) -> (Pid, Option<Child>, Option<NativeExitCode>) {
        (self.pid, self.child, self.exit)
    }

    /// The process id
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Exit code observed before the reference was handed out, if any
    pub fn exit_code(&self) -> Option<NativeExitCode> {
        self.exit
    }

    /// The `std` child, when the process was spawned through `std::process`
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Give up the reference, keeping only the `std` child
    pub fn into_child(self) -> Option<Child> {
        self.child
    }
}

impl From<Child> for NativeProcess {
    fn from(child: Child) -> Self {
        Self {
            pid: Pid::from_raw(child.id() as i32),
            child: Some(child),
            exit: None,
        }
    }
}
