//! Per-user authentication counters for diagnostics.

use biogate_core::{LockoutMode, UserId};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserCounters {
    pub accepts: u64,
    pub rejects: u64,
    pub acquisitions: u64,
    pub timed_lockouts: u64,
    pub permanent_lockouts: u64,
}

/// Counters for one sensor, keyed by user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PerformanceTracker {
    users: BTreeMap<UserId, UserCounters>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self, user_id: UserId) -> UserCounters {
        self.users.get(&user_id).copied().unwrap_or_default()
    }

    pub fn record_accept(&mut self, user_id: UserId) {
        self.entry(user_id).accepts += 1;
    }

    pub fn record_reject(&mut self, user_id: UserId) {
        self.entry(user_id).rejects += 1;
    }

    pub fn record_acquired(&mut self, user_id: UserId) {
        self.entry(user_id).acquisitions += 1;
    }

    pub fn record_lockout(&mut self, user_id: UserId, mode: LockoutMode) {
        match mode {
            LockoutMode::Timed => self.entry(user_id).timed_lockouts += 1,
            LockoutMode::Permanent => self.entry(user_id).permanent_lockouts += 1,
            LockoutMode::None => {}
        }
    }

    fn entry(&mut self, user_id: UserId) -> &mut UserCounters {
        self.users.entry(user_id).or_default()
    }
}
