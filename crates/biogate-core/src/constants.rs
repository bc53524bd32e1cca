//! Core constants for the biogate scheduler.
//!
//! Defaults used when a provider configuration field is omitted, limits enforced by
//! the identifier constructors, and naming conventions shared between the
//! template store and the scheduler.

// ============================================================================
// Scheduling
// ============================================================================

/// Number of completed operations kept per sensor for diagnostics.
///
/// Each history entry is a small, fixed-size record (kind, identity, outcome,
/// two timestamps), so 100 entries stay well under 16KB per sensor while
/// covering several full enroll/authenticate sessions.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Number of crash snapshots kept per sensor.
pub const MAX_CRASH_SNAPSHOTS: usize = 10;

/// Default bounded wait for driver discovery (milliseconds).
///
/// # Examples
///
/// ```
/// use biogate_core::constants::DEFAULT_DISCOVERY_TIMEOUT_MS;
/// use std::time::Duration;
///
/// let timeout = Duration::from_millis(DEFAULT_DISCOVERY_TIMEOUT_MS);
/// assert_eq!(timeout.as_secs(), 5);
/// ```
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5_000;

/// Default watchdog for non-interactive operations (milliseconds).
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Sensors and templates
// ============================================================================

/// Default per-user enrollment limit when sensor properties omit one.
pub const DEFAULT_MAX_ENROLLMENTS_PER_USER: u32 = 5;

/// Prefix for generated template names ("Finger 1", "Finger 2", ...).
pub const TEMPLATE_NAME_PREFIX: &str = "Finger";

/// Maximum length of a user supplied template name, in characters.
pub const MAX_TEMPLATE_NAME_LENGTH: usize = 64;

/// Maximum accepted size of a hardware auth token in bytes.
pub const MAX_AUTH_TOKEN_LENGTH: usize = 1024;

/// Authenticator id reported for users with no known id.
pub const UNKNOWN_AUTHENTICATOR_ID: u64 = 0;

// ============================================================================
// Identities
// ============================================================================

/// Owner identity used for operations the provider schedules on its own.
pub const SYSTEM_OWNER: &str = "android";

/// Owner identity of the lock screen.
pub const KEYGUARD_OWNER: &str = "com.android.systemui";
