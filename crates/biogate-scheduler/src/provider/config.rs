//! Provider configuration.

use crate::error::{ProviderError, Result};
use biogate_core::constants::{
    DEFAULT_DISCOVERY_TIMEOUT_MS, DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLY_TIMEOUT_MS,
    KEYGUARD_OWNER, SYSTEM_OWNER,
};
use biogate_core::{OwnerId, UserId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for one provider instance.
///
/// Every field has a default, so a partial JSON document is enough.
/// Durations are written in humantime form (`"5s"`, `"250ms"`).
///
/// # Examples
///
/// ```
/// use biogate_scheduler::ProviderConfig;
/// use std::time::Duration;
///
/// let config = ProviderConfig::from_json_str(r#"{
///     "instance_name": "fingerprint",
///     "discovery_timeout": "250ms",
///     "reply_timeout": null
/// }"#).unwrap();
///
/// assert_eq!(config.discovery_timeout, Duration::from_millis(250));
/// assert_eq!(config.reply_timeout, None);
/// assert_eq!(config.history_capacity, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Driver instance this provider serves.
    pub instance_name: String,

    /// Users resynchronized after a driver restart, in addition to those
    /// seen at runtime or present in the store.
    pub users: Vec<UserId>,

    /// Owners exempt from the foreground policy.
    pub trusted_owners: Vec<OwnerId>,

    /// Completed operations kept per sensor for diagnostics.
    pub history_capacity: usize,

    /// Upper bound on one connection attempt.
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,

    /// Reply deadline for non-interactive operations. `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Option<Duration>,

    /// Import driver-only templates during resync instead of removing them.
    pub favor_hal_enrollments_on_reconnect: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            instance_name: "default".to_string(),
            users: vec![UserId::SYSTEM],
            trusted_owners: [SYSTEM_OWNER, KEYGUARD_OWNER]
                .into_iter()
                .filter_map(|owner| OwnerId::new(owner).ok())
                .collect(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            discovery_timeout: Duration::from_millis(DEFAULT_DISCOVERY_TIMEOUT_MS),
            reply_timeout: Some(Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS)),
            favor_hal_enrollments_on_reconnect: false,
        }
    }
}

impl ProviderConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Parse` for malformed JSON and
    /// `ProviderError::Config` for values [`validate`](Self::validate) rejects.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON file.
    ///
    /// # Errors
    ///
    /// As [`from_json_str`](Self::from_json_str), plus `ProviderError::Io`
    /// if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Config` for an empty instance name or zero
    /// timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.trim().is_empty() {
            return Err(ProviderError::config("instance_name must not be empty"));
        }
        if self.discovery_timeout.is_zero() {
            return Err(ProviderError::config("discovery_timeout must be positive"));
        }
        if self.reply_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ProviderError::config(
                "reply_timeout must be positive or null",
            ));
        }
        Ok(())
    }
}
