//! Mock driver for testing and development.
//!
//! Implements the full driver contract in memory so the scheduler can be
//! exercised without a driver process.

pub mod driver;

pub use driver::{MockDriver, MockDriverHandle, RecordedCancel, RecordedRequest, ReplyMode};
