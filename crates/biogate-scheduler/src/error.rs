//! Error types for the scheduler and provider.
//!
//! Three layers:
//!
//! - [`OperationError`]: why an operation failed; delivered in its completion
//! - [`SchedulerError`]: a request that did not apply to the sensor's current
//!   state (treated as a logged no-op, never fatal)
//! - [`ProviderError`]: returned by [`ProviderHandle`](crate::ProviderHandle)
//!   methods

use biogate_core::{LockoutMode, RequestId, SensorId};
use biogate_hal::{HalError, HalErrorCode};
use biogate_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Why an operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum OperationError {
    /// No live driver connection could be established.
    #[error("Driver unavailable: {reason}")]
    DriverUnavailable { reason: String },

    /// The driver died while the operation was active or queued.
    #[error("Driver lost")]
    DriverLost,

    /// Authentication refused by the lockout policy.
    #[error("Locked out ({mode})")]
    LockedOut { mode: LockoutMode },

    /// The driver reported an error.
    #[error("Hardware error: {code} (vendor code {vendor_code})")]
    Hardware { code: HalErrorCode, vendor_code: i32 },

    /// No terminal reply within the watchdog period.
    #[error("No reply from driver after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The user already has the maximum number of templates on the sensor.
    #[error("Enrollment limit of {max} reached")]
    EnrollmentLimitReached { max: u32 },

    /// The request is missing something the sensor requires.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The template store failed.
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}

impl OperationError {
    pub fn driver_unavailable(reason: impl Into<String>) -> Self {
        Self::DriverUnavailable {
            reason: reason.into(),
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn storage(error: &StorageError) -> Self {
        Self::Storage {
            reason: error.to_string(),
        }
    }
}

impl From<HalError> for OperationError {
    fn from(error: HalError) -> Self {
        Self::driver_unavailable(error.to_string())
    }
}

/// A request that did not apply to the sensor's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The request id does not belong to the active operation.
    #[error("Request {requested} does not match active operation {active:?}")]
    IdentityMismatch {
        requested: RequestId,
        active: Option<RequestId>,
    },

    /// The active operation does not take touch input.
    #[error("Operation {0} does not accept touch input")]
    TouchNotAccepted(RequestId),

    /// The sensor has no touch overlay.
    #[error("Sensor {0} does not support touch input")]
    TouchUnsupported(SensorId),

    /// No live session to forward to.
    #[error("No live session on sensor {0}")]
    NoSession(SensorId),
}

/// Errors returned by the provider handle.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Scheduling against a sensor the provider does not own.
    #[error("Unknown sensor: {0}")]
    UnknownSensor(SensorId),

    /// The provider task has stopped.
    #[error("Provider stopped")]
    Stopped,

    /// Invalid configuration or sensor properties.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] biogate_core::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
