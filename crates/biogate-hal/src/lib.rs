//! Driver proxy contract for biometric sensors.
//!
//! The driver is a remote, restartable process. This crate describes how the
//! scheduler talks to it:
//!
//! - [`Driver`] discovers and connects to an instance.
//! - [`HalConnection`] opens sessions and reports the process' death once.
//! - [`HalSession`] accepts one primitive per call; replies come back later as
//!   [`HalEvent`]s through the session's [`SessionCallback`].
//!
//! # Replies and tags
//!
//! Every submitted primitive carries an [`OperationTag`](biogate_core::OperationTag)
//! that the driver echoes with each reply. Unsolicited events (a lockout
//! expiring on its own) carry no tag.
//!
//! # Testing
//!
//! The [`mock`] module contains a driver that implements the whole contract
//! in memory, with switches for availability, permissions and process death.

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::{HalError, Result};
pub use traits::{Driver, HalConnection, HalSession};
pub use types::{
    DeathRecipient, EventSink, HalErrorCode, HalEvent, HalReply, HalRequest, PointerContext,
    SessionCallback,
};
