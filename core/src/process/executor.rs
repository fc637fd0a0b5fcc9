//! Executor context shared by process handles
//!
//! An [`Executor`] bundles the tokio runtime that delivers `async_wait`
//! completions with the OS backend and the tunable settings. Handles keep a
//! clone, so it is cheap to copy around.

use super::sys::{ProcessSys, UnixSys};
use crate::config::Settings;
use crate::{CoreError, Result};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Drives completion callbacks for process handles
#[derive(Clone, Debug)]
pub struct Executor {
    runtime: Handle,
    sys: Arc<dyn ProcessSys>,
    settings: Settings,
}

impl Executor {
    /// Executor backed by the given runtime and the real Unix backend
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            sys: Arc::new(UnixSys),
            settings: Settings::default(),
        }
    }

    /// Executor for the runtime the caller is running on
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Executor for the current runtime, or an error outside one
    pub fn try_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| CoreError::InitializationError(format!("no tokio runtime available: {}", e)))
    }

    /// Replace the OS backend
    pub fn with_sys(mut self, sys: Arc<dyn ProcessSys>) -> Self {
        self.sys = sys;
        self
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// The runtime that runs completion callbacks
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// The OS backend
    pub fn sys(&self) -> &Arc<dyn ProcessSys> {
        &self.sys
    }

    /// Tunable settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_current_outside_runtime() {
        let err = Executor::try_current().unwrap_err();
        assert_eq!(err.code(), "CORE003");
    }

    #[tokio::test]
    async fn test_current_inside_runtime() {
        let settings = Settings {
            attach_poll_interval_ms: 5,
        };
        let executor = Executor::current().with_settings(settings);
        assert_eq!(executor.settings().attach_poll_interval(), Duration::from_millis(5));
    }
}
