//! Driver proxy trait definitions.
//!
//! A [`Driver`] is discovered and connected once; the resulting
//! [`HalConnection`] opens one [`HalSession`] per (sensor, user) pair. Every
//! primitive submitted to a session returns immediately and yields exactly one
//! terminal reply later, through the [`SessionCallback`] the session was
//! created with.
//!
//! # Object Safety
//!
//! All three traits are used as trait objects (`Arc<dyn Driver>`), so
//! discovery returns a boxed future instead of using `async fn`.
//!
//! ```no_run
//! use biogate_hal::{Driver, HalRequest, SessionCallback};
//! use biogate_core::{OperationTag, SensorId, UserId};
//! use std::sync::Arc;
//!
//! async fn challenge(driver: Arc<dyn Driver>) -> biogate_hal::Result<()> {
//!     let connection = driver.connect().await?;
//!     let callback = SessionCallback::new(
//!         SensorId::new(1),
//!         UserId::new(0),
//!         Arc::new(|event| println!("{:?}", event)),
//!     );
//!     let session = connection.create_session(SensorId::new(1), UserId::new(0), callback)?;
//!     session.submit(OperationTag::new(1), HalRequest::GenerateChallenge)?;
//!     Ok(())
//! }
//! ```

use crate::error::Result;
use crate::types::{DeathRecipient, HalRequest, SessionCallback};
use biogate_core::{OperationTag, SensorId, UserId};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Entry point to one driver instance.
pub trait Driver: Send + Sync {
    /// Name of the instance this driver connects to.
    fn instance_name(&self) -> &str;

    /// Whether the instance is declared on this device at all.
    fn is_declared(&self) -> bool;

    /// Discover the instance and open a connection.
    ///
    /// Callers bound this with their own timeout.
    fn connect(&self) -> BoxFuture<'static, Result<Arc<dyn HalConnection>>>;
}

/// A live connection to the driver process.
pub trait HalConnection: Send + Sync {
    /// Open a session for one sensor and user.
    ///
    /// # Errors
    ///
    /// Fails with `PermissionDenied` if the caller may not use the sensor, or
    /// `Disconnected` if the connection has already died.
    fn create_session(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        callback: SessionCallback,
    ) -> Result<Arc<dyn HalSession>>;

    /// Register the liveness callback for this connection.
    ///
    /// The recipient is notified at most once, when the driver process dies.
    fn link_to_death(&self, recipient: DeathRecipient) -> Result<()>;
}

/// A hardware session for one sensor and user.
pub trait HalSession: Send + Sync {
    fn sensor_id(&self) -> SensorId;

    fn user_id(&self) -> UserId;

    /// Submit a primitive. The reply arrives later, carrying `tag`.
    fn submit(&self, tag: OperationTag, request: HalRequest) -> Result<()>;

    /// Ask the driver to stop the primitive submitted with `tag`.
    ///
    /// Cooperative: the driver still sends a terminal reply, usually
    /// `Error { code: Canceled, .. }`.
    fn cancel(&self, tag: OperationTag) -> Result<()>;

    /// Close the session.
    fn close(&self);
}
