// Serial settings, runtime timing, topics, and the device configuration model
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::device::{BatteryId, MotorId, ProximityId, ProximityMode, SafetyMode, TemperatureId};

// Serial link
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

// Device shell framing
pub const PROMPT: &str = "uart:~$";
pub const READ_DELIMITER: u8 = b'$';
pub const LINE_TERMINATOR: &str = "\n";

// Runtime loop frequency
pub const LOOP_HZ: u64 = 20;

// How often the sensor set is polled
pub const SENSOR_POLL_PERIOD: Duration = Duration::from_secs(1);

// Pending jobs for the device worker before intents are rejected
pub const JOB_QUEUE_DEPTH: usize = 32;

// Zenoh topics
pub const TOPIC_CMD_INTENT: &str = "pluto/cmd/intent"; // intents in
pub const TOPIC_STATE_VEHICLE: &str = "pluto/state/vehicle"; // motion/handbrake/relays
pub const TOPIC_STATE_SENSORS: &str = "pluto/state/sensors"; // polled readings
pub const TOPIC_HEALTH: &str = "pluto/state/health"; // device link health

// Configuration sections and keys, indexed by the typed identifiers
const MOTOR_SECTIONS: [&str; 2] = ["MOTOR_1_CONFIG", "MOTOR_2_CONFIG"];
const PROXIMITY_SECTION: &str = "PROXIMITY_CONFIG";
const PROXIMITY_MODE_KEYS: [&str; 4] = ["p0_mode", "p1_mode", "p2_mode", "p3_mode"];
const PROXIMITY_THRESHOLD_KEYS: [&str; 4] = [
    "p0_threshold",
    "p1_threshold",
    "p2_threshold",
    "p3_threshold",
];
const EM_BTN_SECTION: &str = "EM_BTN_CONFIG";
const TEMP_SECTION: &str = "TEMP_CONFIG";
const TEMP_SAFETY_KEYS: [&str; 3] = ["t0_safety_enabled", "t1_safety_enabled", "t2_safety_enabled"];
const TEMP_THRESHOLD_KEYS: [&str; 3] = [
    "t0_threshold_temp",
    "t1_threshold_temp",
    "t2_threshold_temp",
];
const BATTERY_SECTION: &str = "BATTERY_CONFIG";
const BATTERY_SAFETY_KEYS: [&str; 4] = [
    "b0_safety_enabled",
    "b1_safety_enabled",
    "b2_safety_enabled",
    "b3_safety_enabled",
];
const BATTERY_THRESHOLD_KEYS: [&str; 4] = [
    "b0_threshold_voltage",
    "b1_threshold_voltage",
    "b2_threshold_voltage",
    "b3_threshold_voltage",
];

/// Source of persisted settings, looked up by section and key
pub trait ConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<String>;

    fn get_or(&self, section: &str, key: &str, fallback: &str) -> String {
        self.get(section, key)
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Read and parse a value, falling back when it is missing or malformed
pub fn get_parsed<T>(store: &dyn ConfigStore, section: &str, key: &str, fallback: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match store.get(section, key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid [{}] {} = {:?}: {}, using default", section, key, raw, e);
                fallback
            }
        },
        None => fallback,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// In-memory store, loadable from a JSON object of sections
///
/// ```json
/// { "MOTOR_1_CONFIG": { "max_speed": 100, "direction": 0 } }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MemoryConfig {
    sections: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<serde_json::Value>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }
}

impl ConfigStore for MemoryConfig {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        let value = self.sections.get(section)?.get(key)?;
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Drive motor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorConfig {
    /// Polarity that counts as forward for this motor (0 or 1)
    pub direction: u8,
    pub max_speed: u32,
    pub accel_rate: u32,
    pub brake_rate: u32,
    pub accel_delay: u32,
    pub brake_delay: u32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            direction: 0,
            max_speed: 0,
            accel_rate: 100,
            brake_rate: 100,
            accel_delay: 1,
            brake_delay: 1,
        }
    }
}

impl MotorConfig {
    pub fn load(store: &dyn ConfigStore, motor: MotorId) -> Self {
        let section = MOTOR_SECTIONS[motor.index()];
        let d = Self::default();
        let mut direction: u8 = get_parsed(store, section, "direction", d.direction);
        if direction > 1 {
            warn!("[{}] direction {} is not 0 or 1, using 0", section, direction);
            direction = 0;
        }
        Self {
            direction,
            max_speed: get_parsed(store, section, "max_speed", d.max_speed),
            accel_rate: get_parsed(store, section, "accel_step_size", d.accel_rate),
            brake_rate: get_parsed(store, section, "brake_step_size", d.brake_rate),
            accel_delay: get_parsed(store, section, "accel_step_delay", d.accel_delay),
            brake_delay: get_parsed(store, section, "brake_step_delay", d.brake_delay),
        }
    }

    /// Polarity that drives this motor backwards
    pub fn reverse_direction(&self) -> u8 {
        1 - self.direction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximitySensorConfig {
    pub mode: ProximityMode,
    pub threshold: i32,
}

impl Default for ProximitySensorConfig {
    fn default() -> Self {
        Self {
            mode: ProximityMode::Off,
            threshold: 100,
        }
    }
}

impl ProximitySensorConfig {
    pub fn load(store: &dyn ConfigStore, sensor: ProximityId) -> Self {
        let d = Self::default();
        Self {
            mode: get_parsed(store, PROXIMITY_SECTION, PROXIMITY_MODE_KEYS[sensor.index()], d.mode),
            threshold: get_parsed(
                store,
                PROXIMITY_SECTION,
                PROXIMITY_THRESHOLD_KEYS[sensor.index()],
                d.threshold,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmergencyButtonConfig {
    pub mode: SafetyMode,
}

impl EmergencyButtonConfig {
    pub fn load(store: &dyn ConfigStore) -> Self {
        Self {
            mode: get_parsed(store, EM_BTN_SECTION, "mode", SafetyMode::Enabled),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureChannelConfig {
    pub safety: SafetyMode,
    /// Cutoff temperature in °C
    pub threshold_temp: f32,
}

impl Default for TemperatureChannelConfig {
    fn default() -> Self {
        Self {
            safety: SafetyMode::Enabled,
            threshold_temp: 69.0,
        }
    }
}

impl TemperatureChannelConfig {
    pub fn load(store: &dyn ConfigStore, sensor: TemperatureId) -> Self {
        let d = Self::default();
        Self {
            safety: get_parsed(store, TEMP_SECTION, TEMP_SAFETY_KEYS[sensor.index()], d.safety),
            threshold_temp: get_parsed(
                store,
                TEMP_SECTION,
                TEMP_THRESHOLD_KEYS[sensor.index()],
                d.threshold_temp,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryChannelConfig {
    pub safety: SafetyMode,
    /// Cutoff cell voltage in volts
    pub threshold_voltage: f32,
}

impl Default for BatteryChannelConfig {
    fn default() -> Self {
        Self {
            safety: SafetyMode::Enabled,
            threshold_voltage: 3.3,
        }
    }
}

impl BatteryChannelConfig {
    pub fn load(store: &dyn ConfigStore, channel: BatteryId) -> Self {
        let d = Self::default();
        Self {
            safety: get_parsed(
                store,
                BATTERY_SECTION,
                BATTERY_SAFETY_KEYS[channel.index()],
                d.safety,
            ),
            threshold_voltage: get_parsed(
                store,
                BATTERY_SECTION,
                BATTERY_THRESHOLD_KEYS[channel.index()],
                d.threshold_voltage,
            ),
        }
    }
}

/// Everything pushed to the device at initialization
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceConfig {
    pub motors: [MotorConfig; 2],
    pub proximity: [ProximitySensorConfig; 4],
    pub emergency_button: EmergencyButtonConfig,
    pub temperature: [TemperatureChannelConfig; 3],
    pub battery: [BatteryChannelConfig; 4],
}

impl DeviceConfig {
    pub fn load(store: &dyn ConfigStore) -> Self {
        Self {
            motors: MotorId::ALL.map(|m| MotorConfig::load(store, m)),
            proximity: ProximityId::ALL.map(|p| ProximitySensorConfig::load(store, p)),
            emergency_button: EmergencyButtonConfig::load(store),
            temperature: TemperatureId::ALL.map(|t| TemperatureChannelConfig::load(store, t)),
            battery: BatteryId::ALL.map(|b| BatteryChannelConfig::load(store, b)),
        }
    }
}
