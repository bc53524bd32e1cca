use crate::error::{StorageError, StorageResult};
use biogate_core::{SensorId, TemplateId, UserId, constants::TEMPLATE_NAME_PREFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One enrolled template as the framework remembers it.
///
/// The driver owns the biometric data; the store only keeps the id, a
/// user-visible name and when it was added.
///
/// # Examples
///
/// ```
/// use biogate_storage::models::TemplateRecord;
/// use biogate_core::TemplateId;
///
/// let record = TemplateRecord::new(TemplateId::new(3), "Finger 1");
/// assert_eq!(record.name, "Finger 1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub template_id: TemplateId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl TemplateRecord {
    pub fn new(template_id: TemplateId, name: impl Into<String>) -> Self {
        Self {
            template_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Smallest free "Finger N" name among `existing`.
///
/// # Examples
///
/// ```
/// use biogate_storage::models::{TemplateRecord, next_template_name};
/// use biogate_core::TemplateId;
///
/// let existing = vec![
///     TemplateRecord::new(TemplateId::new(1), "Finger 1"),
///     TemplateRecord::new(TemplateId::new(2), "Finger 3"),
/// ];
/// assert_eq!(next_template_name(&existing), "Finger 2");
/// ```
pub fn next_template_name(existing: &[TemplateRecord]) -> String {
    (1..)
        .map(|n| format!("{} {}", TEMPLATE_NAME_PREFIX, n))
        .find(|candidate| existing.iter().all(|r| &r.name != candidate))
        .unwrap_or_else(|| TEMPLATE_NAME_PREFIX.to_string())
}

/// Templates of one (sensor, user) pair, in the serialized table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TemplateSet {
    sensor_id: SensorId,
    user_id: UserId,
    templates: Vec<TemplateRecord>,
}

/// In-memory table of templates keyed by (sensor, user).
///
/// Shared by every store implementation; each one wraps it with its own
/// locking and persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TemplateSet>", into = "Vec<TemplateSet>")]
pub(crate) struct TemplateTable {
    sets: BTreeMap<(SensorId, UserId), Vec<TemplateRecord>>,
}

impl From<Vec<TemplateSet>> for TemplateTable {
    fn from(sets: Vec<TemplateSet>) -> Self {
        Self {
            sets: sets
                .into_iter()
                .map(|s| ((s.sensor_id, s.user_id), s.templates))
                .collect(),
        }
    }
}

impl From<TemplateTable> for Vec<TemplateSet> {
    fn from(table: TemplateTable) -> Self {
        table
            .sets
            .into_iter()
            .map(|((sensor_id, user_id), templates)| TemplateSet {
                sensor_id,
                user_id,
                templates,
            })
            .collect()
    }
}

impl TemplateTable {
    pub(crate) fn list(&self, sensor_id: SensorId, user_id: UserId) -> Vec<TemplateRecord> {
        self.sets
            .get(&(sensor_id, user_id))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn add(
        &mut self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: Option<&str>,
    ) -> StorageResult<TemplateRecord> {
        let name = name
            .map(biogate_core::validate_template_name)
            .transpose()?
            .map(str::to_string);
        let templates = self.sets.entry((sensor_id, user_id)).or_default();
        if templates.iter().any(|r| r.template_id == template_id) {
            return Err(StorageError::Duplicate {
                sensor_id,
                user_id,
                template_id,
            });
        }
        let name = name.unwrap_or_else(|| next_template_name(templates));
        let record = TemplateRecord::new(template_id, name);
        templates.push(record.clone());
        Ok(record)
    }

    pub(crate) fn remove(
        &mut self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
    ) -> bool {
        let key = (sensor_id, user_id);
        let Some(templates) = self.sets.get_mut(&key) else {
            return false;
        };
        let before = templates.len();
        templates.retain(|r| r.template_id != template_id);
        let removed = templates.len() != before;
        if templates.is_empty() {
            self.sets.remove(&key);
        }
        removed
    }

    pub(crate) fn rename(
        &mut self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: &str,
    ) -> StorageResult<()> {
        let name = biogate_core::validate_template_name(name)?;
        let record = self
            .sets
            .get_mut(&(sensor_id, user_id))
            .and_then(|templates| templates.iter_mut().find(|r| r.template_id == template_id))
            .ok_or(StorageError::NotFound {
                sensor_id,
                user_id,
                template_id,
            })?;
        record.name = name.to_string();
        Ok(())
    }

    pub(crate) fn users(&self, sensor_id: SensorId) -> Vec<UserId> {
        self.sets
            .keys()
            .filter(|(sensor, _)| *sensor == sensor_id)
            .map(|(_, user)| *user)
            .collect()
    }
}
