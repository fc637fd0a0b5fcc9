//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Spawn error: {0}")]
    SpawnError(String),

    #[error("Invalid pid: {0}")]
    InvalidPid(i32),

    #[error("Signal delivery error: {0}")]
    SignalDeliveryError(String),

    #[error("Wait error: {0}")]
    WaitError(String),

    #[error("Misuse: {0}")]
    MisuseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::IoError(_) => "CORE005",
            CoreError::SpawnError(_) => "CORE010",
            CoreError::InvalidPid(_) => "CORE011",
            CoreError::SignalDeliveryError(_) => "CORE012",
            CoreError::WaitError(_) => "CORE013",
            CoreError::MisuseError(_) => "CORE014",
        }
    }

    /// Whether the error is a caller contract violation rather than a runtime condition
    pub fn is_misuse(&self) -> bool {
        matches!(self, CoreError::MisuseError(_))
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

/// Caller-owned output slot for the reporting (`*_into`) operations.
///
/// Every reporting call clears the slot on success and stores the error on
/// failure, so after a call the slot always describes that call.
#[derive(Debug, Default)]
pub struct ErrorSlot(Option<CoreError>);

impl ErrorSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self(None)
    }

    /// Whether the last reporting call failed
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Borrow the stored error, if any
    pub fn error(&self) -> Option<&CoreError> {
        self.0.as_ref()
    }

    /// Take the stored error, leaving the slot empty
    pub fn take(&mut self) -> Option<CoreError> {
        self.0.take()
    }

    /// Store an error, replacing any previous one
    pub fn set(&mut self, error: CoreError) {
        self.0 = Some(error);
    }

    /// Empty the slot
    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Convert the slot back into a `Result`
    pub fn into_result(self) -> Result<()> {
        match self.0 {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Record the outcome of a propagating operation, returning `fallback` on failure
    pub(crate) fn report<T>(&mut self, result: Result<T>, fallback: T) -> T {
        match result {
            Ok(value) => {
                self.clear();
                value
            }
            Err(error) => {
                self.set(error);
                fallback
            }
        }
    }
}
