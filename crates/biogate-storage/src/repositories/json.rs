use super::TemplateStore;
use crate::error::StorageResult;
use crate::models::{TemplateRecord, TemplateTable};
use biogate_core::{SensorId, TemplateId, UserId};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Template store persisted as a single JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new table on disk. A failed write
/// leaves the in-memory table unchanged.
///
/// # Examples
///
/// ```no_run
/// use biogate_storage::{JsonFileTemplateStore, TemplateStore};
/// use biogate_core::{SensorId, UserId};
///
/// # fn example() -> biogate_storage::StorageResult<()> {
/// let store = JsonFileTemplateStore::open("/var/lib/biogate/templates.json")?;
/// let templates = store.list(SensorId::new(1), UserId::new(0))?;
/// println!("{} templates", templates.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JsonFileTemplateStore {
    path: PathBuf,
    table: Mutex<TemplateTable>,
}

impl JsonFileTemplateStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            TemplateTable::default()
        };
        debug!(path = %path.display(), "Opened template store");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> MutexGuard<'_, TemplateTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, table: &TemplateTable) -> StorageResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `f` to a copy of the table and commit it once it is on disk.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut TemplateTable) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut table = self.table();
        let mut next = table.clone();
        let value = f(&mut next)?;
        self.persist(&next)?;
        *table = next;
        Ok(value)
    }
}

impl TemplateStore for JsonFileTemplateStore {
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
        self.mutate(|table| table.add(sensor_id, user_id, template_id, name))
    }

    fn remove(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
    ) -> StorageResult<bool> {
        self.mutate(|table| Ok(table.remove(sensor_id, user_id, template_id)))
    }

    fn rename(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: &str,
    ) -> StorageResult<()> {
        self.mutate(|table| table.rename(sensor_id, user_id, template_id, name))
    }

    fn users(&self, sensor_id: SensorId) -> StorageResult<Vec<UserId>> {
        Ok(self.table().users(sensor_id))
    }
}
