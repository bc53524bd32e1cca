//! Reconciliation of the template store against the driver.
//!
//! The driver is authoritative. After a reconnect, an enrollment or a removal
//! the two views can drift apart; reconciliation resolves every difference:
//!
//! | store | driver | `favor_hal_enrollments` | action                  |
//! |-------|--------|-------------------------|-------------------------|
//! | yes   | no     | any                     | remove from store       |
//! | no    | yes    | `true`                  | import into store       |
//! | no    | yes    | `false`                 | remove from driver      |
//!
//! Each difference is logged at warn level for audit.

use biogate_core::{SensorId, TemplateId, UserId};
use biogate_storage::{StorageResult, TemplateStore};
use serde::Serialize;
use tracing::{debug, warn};

/// What reconciliation changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub sensor_id: SensorId,
    pub user_id: UserId,
    /// Stored templates the driver no longer has.
    pub removed_from_store: Vec<TemplateId>,
    /// Driver templates added to the store.
    pub imported: Vec<TemplateId>,
    /// Driver templates the store never knew; removed from the driver.
    pub removed_from_driver: Vec<TemplateId>,
}

impl ReconciliationReport {
    pub fn new(sensor_id: SensorId, user_id: UserId) -> Self {
        Self {
            sensor_id,
            user_id,
            removed_from_store: Vec::new(),
            imported: Vec::new(),
            removed_from_driver: Vec::new(),
        }
    }

    /// `true` if store and driver already agreed.
    pub fn is_consistent(&self) -> bool {
        self.removed_from_store.is_empty()
            && self.imported.is_empty()
            && self.removed_from_driver.is_empty()
    }
}

/// Bring the store in line with `driver_templates`.
///
/// Store changes are applied immediately. Templates listed in
/// `removed_from_driver` still have to be removed from the driver by the
/// caller.
///
/// # Errors
///
/// Returns the first store error; changes made before it are kept.
pub fn reconcile(
    store: &dyn TemplateStore,
    sensor_id: SensorId,
    user_id: UserId,
    driver_templates: &[TemplateId],
    favor_hal_enrollments: bool,
) -> StorageResult<ReconciliationReport> {
    let stored: Vec<TemplateId> = store
        .list(sensor_id, user_id)?
        .into_iter()
        .map(|r| r.template_id)
        .collect();

    let mut report = ReconciliationReport::new(sensor_id, user_id);

    for template_id in stored.iter().filter(|t| !driver_templates.contains(t)) {
        warn!(
            sensor_id = %sensor_id,
            user_id = %user_id,
            template_id = %template_id,
            "Template missing on driver, removing from store"
        );
        store.remove(sensor_id, user_id, *template_id)?;
        report.removed_from_store.push(*template_id);
    }

    for template_id in driver_templates.iter().filter(|t| !stored.contains(t)) {
        if favor_hal_enrollments {
            warn!(
                sensor_id = %sensor_id,
                user_id = %user_id,
                template_id = %template_id,
                "Unknown driver template, importing into store"
            );
            store.add(sensor_id, user_id, *template_id, None)?;
            report.imported.push(*template_id);
        } else {
            warn!(
                sensor_id = %sensor_id,
                user_id = %user_id,
                template_id = %template_id,
                "Unknown driver template, removing from driver"
            );
            report.removed_from_driver.push(*template_id);
        }
    }

    if report.is_consistent() {
        debug!(sensor_id = %sensor_id, user_id = %user_id, "Store and driver agree");
    }
    Ok(report)
}
