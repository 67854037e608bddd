use thiserror::Error;

use crate::network::core::CaptureError;

/// Every failure the throttler can surface.
///
/// Recoverable conditions (`PortDiscoveryFailed`, `FilterRejected`) are
/// normally handled locally and only reach the top level when every
/// fallback has been exhausted.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    /// Configuration failed validation at load time
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No running process matched the configured name pattern
    #[error("No process matching '{0}' found")]
    TargetNotFound(String),

    /// Connection enumeration for the target failed; the run continues
    /// with the fallback port range
    #[error("Port discovery failed for PID {pid}: {reason}")]
    PortDiscoveryFailed { pid: u32, reason: String },

    /// The capture driver refused the filter expression
    #[error("Capture filter rejected: {0}")]
    FilterRejected(String),

    /// Packet capture could not be started at all
    #[error("Failed to open packet capture: {0}")]
    CaptureOpen(String),

    /// Capture failed after the loop was running
    #[error("Packet capture error: {0}")]
    CaptureRuntime(String),

    /// A caller passed a value outside the operation's contract
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Packet capture requires an elevated process
    #[error("Administrator privileges required")]
    NotElevated,

    /// Error when a mutex/rwlock is poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// I/O errors from file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenient Result type alias using `ThrottlerError`.
pub type Result<T> = std::result::Result<T, ThrottlerError>;

impl ThrottlerError {
    /// Creates a new lock poisoned error with a descriptive message.
    pub fn lock_poisoned(resource: &str) -> Self {
        Self::LockPoisoned(format!("Failed to acquire lock on {}", resource))
    }

    /// Whether this error came from the capture driver, in which case the
    /// troubleshooting checklist is worth showing.
    pub fn is_capture_failure(&self) -> bool {
        matches!(
            self,
            Self::CaptureOpen(_) | Self::CaptureRuntime(_) | Self::FilterRejected(_)
        )
    }
}

impl From<CaptureError> for ThrottlerError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::FilterRejected(msg) => Self::FilterRejected(msg),
            CaptureError::Open(msg) | CaptureError::Unsupported(msg) => Self::CaptureOpen(msg),
            CaptureError::Recv(msg) | CaptureError::Send(msg) | CaptureError::Close(msg) => {
                Self::CaptureRuntime(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_conversion() {
        let err: ThrottlerError = CaptureError::FilterRejected("too long".into()).into();
        assert!(matches!(err, ThrottlerError::FilterRejected(_)));

        let err: ThrottlerError = CaptureError::Recv("driver gone".into()).into();
        assert!(matches!(err, ThrottlerError::CaptureRuntime(_)));
        assert!(err.to_string().contains("driver gone"));

        let err: ThrottlerError = CaptureError::Unsupported("no driver".into()).into();
        assert!(matches!(err, ThrottlerError::CaptureOpen(_)));
    }

    #[test]
    fn test_is_capture_failure() {
        assert!(ThrottlerError::CaptureRuntime("x".into()).is_capture_failure());
        assert!(ThrottlerError::CaptureOpen("x".into()).is_capture_failure());
        assert!(!ThrottlerError::TargetNotFound("game".into()).is_capture_failure());
        assert!(!ThrottlerError::ConfigInvalid("x".into()).is_capture_failure());
    }

    #[test]
    fn test_target_not_found_message() {
        let err = ThrottlerError::TargetNotFound("game".into());
        assert_eq!(err.to_string(), "No process matching 'game' found");
    }
}
