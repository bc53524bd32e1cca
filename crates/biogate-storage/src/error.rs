use biogate_core::{SensorId, TemplateId, UserId};
use thiserror::Error;

/// Storage-specific error types for the template store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Template not present for the sensor and user
    #[error("Template not found: sensor {sensor_id} user {user_id} template {template_id}")]
    NotFound {
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
    },

    /// Template id already stored for the sensor and user
    #[error("Template already exists: sensor {sensor_id} user {user_id} template {template_id}")]
    Duplicate {
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
    },

    /// Data validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] biogate_core::Error),

    /// Reading or writing the backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid JSON for a template table
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
