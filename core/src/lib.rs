//! Core functionality for coproc
//!
//! This crate manages the lifecycle of OS child processes from async code:
//! spawning or attaching, best-effort signals, blocking and suspending exit
//! waits with a cached exit code, and a drop policy that kills processes
//! nobody detached.

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod process;

#[cfg(test)]
mod error_tests;

pub use config::{CoprocFile, LaunchSpec, Settings, StdioMode};
pub use error::{CoreError, ErrorSlot, Result};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_fails() {
        let _ = utils::init_tracing("debug");
        let err = utils::init_tracing("debug").unwrap_err();
        assert_eq!(err.code(), "CORE003");
    }
}
