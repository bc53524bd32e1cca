//! Error types for driver operations.
//!
//! These cover the ways a driver proxy can refuse work: no instance to connect
//! to, a caller without permission, a connection that died underneath a
//! session, or a request the driver does not implement.

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors that can occur while talking to a driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    /// No live driver instance could be reached.
    #[error("Driver unavailable: {instance}")]
    Unavailable { instance: String },

    /// The caller may not open a session.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// The connection died.
    #[error("Driver disconnected: {message}")]
    Disconnected { message: String },

    /// Registering for death notification failed.
    #[error("Link to death failed: {message}")]
    LinkToDeath { message: String },

    /// Discovery did not finish in time.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The session was closed by its owner.
    #[error("Session closed for sensor {sensor_id}")]
    SessionClosed { sensor_id: u32 },

    /// Request not implemented by this driver.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HalError {
    /// Create a new unavailable error.
    pub fn unavailable(instance: impl Into<String>) -> Self {
        Self::Unavailable {
            instance: instance.into(),
        }
    }

    /// Create a new permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Create a new link-to-death error.
    pub fn link_to_death(message: impl Into<String>) -> Self {
        Self::LinkToDeath {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new session closed error.
    pub fn session_closed(sensor_id: u32) -> Self {
        Self::SessionClosed { sensor_id }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }
}
