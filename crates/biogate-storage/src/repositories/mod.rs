mod json;
mod memory;

pub use json::JsonFileTemplateStore;
pub use memory::InMemoryTemplateStore;

use crate::error::StorageResult;
use crate::models::TemplateRecord;
use biogate_core::{SensorId, TemplateId, UserId};

/// Persistent template store keyed by (sensor, user).
///
/// Calls are synchronous and local. The scheduler calls them from its own
/// task while reconciling, so implementations must not block for long.
pub trait TemplateStore: Send + Sync {
    /// Templates for a sensor and user, in the order they were added.
    fn list(&self, sensor_id: SensorId, user_id: UserId) -> StorageResult<Vec<TemplateRecord>>;

    /// Add a template. `None` picks the next free "Finger N" name.
    fn add(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: Option<&str>,
    ) -> StorageResult<TemplateRecord>;

    /// Remove a template. Returns `false` if it was not stored.
    fn remove(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
    ) -> StorageResult<bool>;

    /// Change the user-visible name of a template.
    fn rename(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: &str,
    ) -> StorageResult<()>;

    /// Users with at least one template on the sensor.
    fn users(&self, sensor_id: SensorId) -> StorageResult<Vec<UserId>>;
}
