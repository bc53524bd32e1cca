//! Persistent template store for the biogate scheduler.
//!
//! The driver is the authority on which templates exist; this crate keeps the
//! framework's own view (template ids and user-visible names) so it survives
//! restarts and can be reconciled against the driver after a crash.
//!
//! # Implementations
//!
//! - [`InMemoryTemplateStore`] for tests and ephemeral runs
//! - [`JsonFileTemplateStore`] for a single JSON file on disk
//!
//! Both share the same table logic, so naming ("Finger 1", "Finger 2", ...)
//! and duplicate handling behave identically.
//!
//! # Examples
//!
//! ```
//! use biogate_storage::{InMemoryTemplateStore, TemplateStore};
//! use biogate_core::{SensorId, TemplateId, UserId};
//!
//! # fn example() -> biogate_storage::StorageResult<()> {
//! let store = InMemoryTemplateStore::new();
//! let sensor = SensorId::new(1);
//! let user = UserId::new(0);
//!
//! store.add(sensor, user, TemplateId::new(11), None)?;
//! store.add(sensor, user, TemplateId::new(12), Some("Left thumb"))?;
//! store.rename(sensor, user, TemplateId::new(11), "Right index")?;
//!
//! let names: Vec<_> = store.list(sensor, user)?.into_iter().map(|r| r.name).collect();
//! assert_eq!(names, vec!["Right index", "Left thumb"]);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod error;
pub mod models;
pub mod repositories;

pub use error::{StorageError, StorageResult};
pub use models::TemplateRecord;
pub use repositories::{InMemoryTemplateStore, JsonFileTemplateStore, TemplateStore};
