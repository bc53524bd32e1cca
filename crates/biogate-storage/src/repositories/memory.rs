use super::TemplateStore;
use crate::error::StorageResult;
use crate::models::{TemplateRecord, TemplateTable};
use biogate_core::{SensorId, TemplateId, UserId};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Template store that lives only as long as the process.
///
/// # Examples
///
/// ```
/// use biogate_storage::{InMemoryTemplateStore, TemplateStore};
/// use biogate_core::{SensorId, TemplateId, UserId};
///
/// let store = InMemoryTemplateStore::new();
/// let record = store
///     .add(SensorId::new(1), UserId::new(0), TemplateId::new(7), None)
///     .unwrap();
/// assert_eq!(record.name, "Finger 1");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    table: Mutex<TemplateTable>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, TemplateTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn list(&self, sensor_id: SensorId, user_id: UserId) -> StorageResult<Vec<TemplateRecord>> {
        Ok(self.table().list(sensor_id, user_id))
    }

    fn add(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: Option<&str>,
    ) -> StorageResult<TemplateRecord> {
        self.table().add(sensor_id, user_id, template_id, name)
    }

    fn remove(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
    ) -> StorageResult<bool> {
        Ok(self.table().remove(sensor_id, user_id, template_id))
    }

    fn rename(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: &str,
    ) -> StorageResult<()> {
        self.table().rename(sensor_id, user_id, template_id, name)
    }

    fn users(&self, sensor_id: SensorId) -> StorageResult<Vec<UserId>> {
        Ok(self.table().users(sensor_id))
    }
}
