//! Static sensor properties supplied when a provider is constructed.

use crate::{Result, constants::DEFAULT_MAX_ENROLLMENTS_PER_USER, error::Error, types::SensorId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Security strength of a sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStrength {
    Convenience,
    Weak,
    #[default]
    Strong,
}

/// Physical form of a fingerprint sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorType {
    #[default]
    Unknown,
    Rear,
    UdfpsUltrasonic,
    UdfpsOptical,
    PowerButton,
    HomeButton,
}

impl SensorType {
    /// Returns `true` for sensors under the display, which receive touch
    /// coordinates from the UI.
    #[must_use]
    pub fn is_under_display(self) -> bool {
        matches!(self, SensorType::UdfpsOptical | SensorType::UdfpsUltrasonic)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SensorType::Unknown => "Unknown",
            SensorType::Rear => "Rear",
            SensorType::UdfpsUltrasonic => "UDFPS ultrasonic",
            SensorType::UdfpsOptical => "UDFPS optical",
            SensorType::PowerButton => "Power button",
            SensorType::HomeButton => "Home button",
        };
        write!(f, "{}", s)
    }
}

/// Version information for one hardware or software component of a sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub component_id: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub software_version: String,
}

impl ComponentInfo {
    /// Create component info with only an id.
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            ..Default::default()
        }
    }

    /// Set the firmware version.
    #[must_use]
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = version.into();
        self
    }
}

/// Properties of one sensor.
///
/// # Examples
///
/// ```
/// use biogate_core::{SensorId, SensorProperties, SensorType};
///
/// let props = SensorProperties::new(SensorId::new(1))
///     .with_sensor_type(SensorType::UdfpsOptical)
///     .with_max_enrollments(3);
///
/// assert!(props.validate().is_ok());
/// assert!(props.sensor_type.is_under_display());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorProperties {
    pub sensor_id: SensorId,

    #[serde(default)]
    pub strength: SensorStrength,

    #[serde(default)]
    pub sensor_type: SensorType,

    #[serde(default = "default_max_enrollments")]
    pub max_enrollments_per_user: u32,

    #[serde(default)]
    pub component_info: Vec<ComponentInfo>,

    /// Whether a lockout reset must carry a hardware auth token.
    #[serde(default = "default_true")]
    pub reset_lockout_requires_hat: bool,
}

fn default_max_enrollments() -> u32 {
    DEFAULT_MAX_ENROLLMENTS_PER_USER
}

fn default_true() -> bool {
    true
}

impl SensorProperties {
    /// Create properties with defaults for everything except the id.
    pub fn new(sensor_id: SensorId) -> Self {
        Self {
            sensor_id,
            strength: SensorStrength::default(),
            sensor_type: SensorType::default(),
            max_enrollments_per_user: DEFAULT_MAX_ENROLLMENTS_PER_USER,
            component_info: Vec::new(),
            reset_lockout_requires_hat: true,
        }
    }

    #[must_use]
    pub fn with_strength(mut self, strength: SensorStrength) -> Self {
        self.strength = strength;
        self
    }

    #[must_use]
    pub fn with_sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    #[must_use]
    pub fn with_max_enrollments(mut self, max: u32) -> Self {
        self.max_enrollments_per_user = max;
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: ComponentInfo) -> Self {
        self.component_info.push(component);
        self
    }

    /// Check the properties for values no sensor can have.
    ///
    /// # Errors
    /// Returns `Error::InvalidSensorProperties` if the enrollment limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_enrollments_per_user == 0 {
            return Err(Error::InvalidSensorProperties(format!(
                "sensor {} must allow at least one enrollment per user",
                self.sensor_id
            )));
        }
        Ok(())
    }
}

/// Selects a sensor for a property lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorSelector {
    /// The first sensor of the provider.
    Any,

    /// A specific sensor.
    Id(SensorId),
}

impl From<SensorId> for SensorSelector {
    fn from(id: SensorId) -> Self {
        SensorSelector::Id(id)
    }
}
