//! Shared vocabulary for the biogate sensor scheduler.
//!
//! Identifiers, sensor properties, lockout state and constants used by the
//! driver contract (`biogate-hal`), the template store (`biogate-storage`) and
//! the scheduler itself (`biogate-scheduler`).

pub mod constants;
pub mod error;
pub mod props;
pub mod types;

pub use error::{Error, Result};
pub use props::{ComponentInfo, SensorProperties, SensorSelector, SensorStrength, SensorType};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
