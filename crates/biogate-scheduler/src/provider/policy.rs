//! Foreground-app signal used by the task-stack policy.

use biogate_core::OwnerId;
use std::sync::{Mutex, PoisonError};

/// Reports which app is in the foreground.
///
/// Queried once per task-stack change, never polled.
pub trait ForegroundPolicy: Send + Sync {
    fn current_foreground_owner(&self) -> Option<OwnerId>;
}

/// Policy whose foreground owner is set by hand.
///
/// # Examples
///
/// ```
/// use biogate_scheduler::{ForegroundPolicy, StaticForegroundPolicy};
/// use biogate_core::OwnerId;
///
/// let policy = StaticForegroundPolicy::new(None);
/// policy.set(Some(OwnerId::new("com.example.app").unwrap()));
/// assert_eq!(
///     policy.current_foreground_owner().map(|o| o.to_string()),
///     Some("com.example.app".to_string())
/// );
/// ```
#[derive(Debug, Default)]
pub struct StaticForegroundPolicy {
    owner: Mutex<Option<OwnerId>>,
}

impl StaticForegroundPolicy {
    pub fn new(owner: Option<OwnerId>) -> Self {
        Self {
            owner: Mutex::new(owner),
        }
    }

    pub fn set(&self, owner: Option<OwnerId>) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }
}

impl ForegroundPolicy for StaticForegroundPolicy {
    fn current_foreground_owner(&self) -> Option<OwnerId> {
        self.owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
