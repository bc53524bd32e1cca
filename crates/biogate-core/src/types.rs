use crate::{
    Result,
    constants::{MAX_AUTH_TOKEN_LENGTH, MAX_TEMPLATE_NAME_LENGTH},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Sensor identifier, assigned once when the provider is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(u32);

impl SensorId {
    /// Create a sensor id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        SensorId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SensorId {
    fn from(id: u32) -> Self {
        SensorId(id)
    }
}

/// User (profile) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    /// The primary user.
    pub const SYSTEM: UserId = UserId(0);

    /// Create a user id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        UserId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for UserId {
    fn from(id: u32) -> Self {
        UserId(id)
    }
}

/// Request identifier.
///
/// Unique for the lifetime of the provider that issued it and the only key
/// used to match cancellations and touch events to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Create a request id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        RequestId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of a caller.
///
/// Two operations from the same caller share a token; the token never carries
/// meaning beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(Uuid);

impl ClientToken {
    /// Create a fresh, random token.
    #[must_use]
    pub fn new() -> Self {
        ClientToken(Uuid::new_v4())
    }

    /// Wrap an existing uuid.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        ClientToken(uuid)
    }

    /// Get the underlying uuid.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // First segment only, enough to correlate log lines
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Identity of the app that owns an operation (its package name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner identity.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the name is empty after trimming.
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidIdentifier {
                message: "Owner identity cannot be empty".to_string(),
            });
        }
        Ok(OwnerId(name.to_string()))
    }

    /// Get the owner name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OwnerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OwnerId::new(s)
    }
}

/// Identifier of one enrolled template on a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(u32);

impl TemplateId {
    /// Create a template id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        TemplateId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cookie that holds a prepared operation until an external coordinator
/// releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(NonZeroU32);

impl Cookie {
    /// Create a cookie.
    ///
    /// # Errors
    /// Returns `Error::InvalidCookie` for zero, which means "no cookie".
    ///
    /// # Examples
    ///
    /// ```
    /// use biogate_core::Cookie;
    ///
    /// assert!(Cookie::new(42).is_ok());
    /// assert!(Cookie::new(0).is_err());
    /// ```
    pub fn new(value: u32) -> Result<Self> {
        NonZeroU32::new(value)
            .map(Cookie)
            .ok_or(Error::InvalidCookie(value))
    }

    /// Get the raw value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag attached to every primitive submitted to the driver.
///
/// The driver echoes it back with each reply so that replies belonging to a
/// finished or cancelled operation can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationTag(u64);

impl OperationTag {
    /// Create a tag.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        OperationTag(value)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The tag following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        OperationTag(self.0.wrapping_add(1))
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lockout state of a user on one sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutMode {
    /// Authentication allowed.
    #[default]
    None,

    /// Too many failures; cleared by the driver after a delay.
    Timed,

    /// Too many failures; only a lockout reset clears it.
    Permanent,
}

impl LockoutMode {
    /// Returns `true` if authentication is currently refused.
    #[inline]
    #[must_use]
    pub fn is_locked_out(self) -> bool {
        !matches!(self, LockoutMode::None)
    }
}

impl fmt::Display for LockoutMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockoutMode::None => write!(f, "None"),
            LockoutMode::Timed => write!(f, "Timed"),
            LockoutMode::Permanent => write!(f, "Permanent"),
        }
    }
}

/// Hardware auth token proving a recent strong authentication.
///
/// # Security
/// Comparison is constant-time and `Debug` never prints the token bytes.
#[derive(Clone, Eq, Serialize, Deserialize)]
pub struct HardwareAuthToken(Vec<u8>);

impl HardwareAuthToken {
    /// Wrap token bytes.
    ///
    /// # Errors
    /// Returns `Error::InvalidAuthToken` if the token is empty or longer than
    /// [`MAX_AUTH_TOKEN_LENGTH`].
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidAuthToken("token cannot be empty".to_string()));
        }
        if bytes.len() > MAX_AUTH_TOKEN_LENGTH {
            return Err(Error::InvalidAuthToken(format!(
                "token must be at most {MAX_AUTH_TOKEN_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(HardwareAuthToken(bytes))
    }

    /// Get the token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Token length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; empty tokens are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for HardwareAuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for HardwareAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAuthToken({} bytes)", self.0.len())
    }
}

/// Validate a user supplied template name.
///
/// # Errors
/// Returns `Error::InvalidTemplateName` for empty or overlong names.
pub fn validate_template_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidTemplateName("name cannot be empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > MAX_TEMPLATE_NAME_LENGTH {
        return Err(Error::InvalidTemplateName(format!(
            "name must be at most {MAX_TEMPLATE_NAME_LENGTH} chars, got {len}"
        )));
    }
    Ok(trimmed)
}
