#[cfg(test)]
mod tests {
    use crate::error::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::SpawnError("Failed to spawn 'nope': not found".to_string());
        assert_eq!(err.to_string(), "Spawn error: Failed to spawn 'nope': not found");

        let err = CoreError::SignalDeliveryError("process 12 already exited".to_string());
        assert_eq!(
            err.to_string(),
            "Signal delivery error: process 12 already exited"
        );

        let err = CoreError::WaitError("waitpid(12) failed".to_string());
        assert_eq!(err.to_string(), "Wait error: waitpid(12) failed");

        let err = CoreError::MisuseError("invalid handle".to_string());
        assert_eq!(err.to_string(), "Misuse: invalid handle");

        let err = CoreError::ConfigurationError("bad config".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad config");
    }

    #[test]
    fn test_core_error_from_std_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();

        if let CoreError::IoError(_) = core_err {
            // Expected variant
        } else {
            panic!("Expected CoreError::IoError variant");
        }
    }

    #[test]
    fn test_result_type_alias() {
        #[allow(clippy::unnecessary_wraps)]
        fn returns_result() -> Result<i32> {
            Ok(7)
        }

        fn returns_error() -> Result<i32> {
            Err(CoreError::InvalidPid(0))
        }

        assert!(returns_result().is_ok());
        assert!(returns_error().is_err());
    }

    #[test]
    fn test_error_trait_implementation() {
        let err = CoreError::WaitError("test".to_string());

        let _: &dyn Error = &err;
        assert!(err.source().is_none());

        let err: CoreError = io::Error::new(io::ErrorKind::Other, "inner").into();
        assert!(err.source().is_some());
    }

    #[test]
    fn test_misuse_classification() {
        assert!(CoreError::MisuseError("x".to_string()).is_misuse());
        assert!(!CoreError::WaitError("x".to_string()).is_misuse());
        assert!(!CoreError::InvalidPid(1).is_misuse());
    }

    #[test]
    fn test_error_slot_take() {
        let mut slot = ErrorSlot::default();
        assert!(slot.error().is_none());

        slot.set(CoreError::InvalidPid(5));
        assert_eq!(slot.error().map(CoreError::code), Some("CORE011"));

        let taken = slot.take();
        assert!(matches!(taken, Some(CoreError::InvalidPid(5))));
        assert!(!slot.is_set());
    }
}
