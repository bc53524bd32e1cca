//! Per-sensor operation scheduling for biometric drivers.
//!
//! A [`Provider`] owns the sensors of one driver instance. Each sensor runs at
//! most one operation at a time; everything else waits in a FIFO queue. The
//! provider connects to the driver on demand, fails outstanding work when the
//! driver process dies, and resynchronizes templates and authenticator ids
//! after it comes back.
//!
//! # Layers
//!
//! - [`scheduler::Scheduler`]: the synchronous queue and state machine for one
//!   sensor, independent of any driver.
//! - `Sensor`: binds a scheduler to a driver session, the template store and
//!   the lockout and authenticator-id caches.
//! - [`Provider`] / [`ProviderHandle`]: the tokio task that owns all sensors
//!   and the cloneable handle callers use.
//!
//! # Example
//!
//! ```
//! use biogate_scheduler::{ClientRequest, Provider, ProviderConfig, StaticForegroundPolicy};
//! use biogate_core::{HardwareAuthToken, OwnerId, SensorId, SensorProperties, UserId};
//! use biogate_hal::mock::MockDriver;
//! use biogate_storage::InMemoryTemplateStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> biogate_scheduler::Result<()> {
//! let (driver, _mock) = MockDriver::new();
//! let handle = Provider::new(
//!     ProviderConfig::default(),
//!     vec![SensorProperties::new(SensorId::new(1))],
//!     Arc::new(driver),
//!     Arc::new(InMemoryTemplateStore::new()),
//!     Arc::new(StaticForegroundPolicy::default()),
//! )?
//! .start();
//!
//! let request = ClientRequest::new(SensorId::new(1), UserId::new(0), OwnerId::new("com.example.settings")?);
//! let hat = HardwareAuthToken::new(vec![0; 16])?;
//! let mut scheduled = handle.enroll(request, hat, None)?;
//!
//! let completion = scheduled.events.finished().await.expect("completed");
//! assert!(completion.outcome.is_success());
//! assert_eq!(handle.enrolled_templates(SensorId::new(1), UserId::new(0))?.len(), 1);
//! # handle.shutdown().await
//! # }
//! ```

pub mod cleanup;
pub mod error;
pub mod observer;
pub mod operation;
pub mod provider;
pub mod scheduler;
mod sensor;
mod session;
pub mod tracker;

pub use cleanup::{ReconciliationReport, reconcile};
pub use error::{OperationError, ProviderError, Result, SchedulerError};
pub use observer::{
    BiometricStateEvent, ChannelObserver, ClientEvent, ClientEvents, ClientObserver,
    CompletionChain, StateBroadcastObserver,
};
pub use operation::{
    CancelReason, CleanupState, Completion, Operation, OperationInfo, OperationKind,
    OperationOutcome, OperationResult, Progress,
};
pub use provider::{
    ClientRequest, ForegroundPolicy, Provider, ProviderConfig, ProviderDump, ProviderHandle,
    ScheduledOperation, StaticForegroundPolicy,
};
pub use sensor::{SensorDump, TouchEvent};
pub use tracker::{PerformanceTracker, UserCounters};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
