// Command lines for the device shell and parsers for its replies
//
// One logical operation maps to exactly one ASCII line without terminator.
// All values on the wire are decimal ASCII.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{DeviceError, Result};

/// Battery thresholds are cut to this many characters on the wire
pub const MAX_THRESHOLD_CHARS: usize = 6;

/// Drive motor slot (wire numbers 1 and 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorId {
    Motor1,
    Motor2,
}

impl MotorId {
    pub const ALL: [MotorId; 2] = [MotorId::Motor1, MotorId::Motor2];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Number used in `motor<N>` commands
    pub fn number(self) -> u8 {
        self as u8 + 1
    }
}

/// Proximity sensor `p_0`..`p_3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProximityId {
    P0,
    P1,
    P2,
    P3,
}

impl ProximityId {
    pub const ALL: [ProximityId; 4] = [
        ProximityId::P0,
        ProximityId::P1,
        ProximityId::P2,
        ProximityId::P3,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// MCP9808 temperature sensor 0..2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemperatureId {
    T0,
    T1,
    T2,
}

impl TemperatureId {
    pub const ALL: [TemperatureId; 3] = [TemperatureId::T0, TemperatureId::T1, TemperatureId::T2];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// ADS1115 input 0..3, one per battery tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatteryId {
    B0,
    B1,
    B2,
    B3,
}

impl BatteryId {
    pub const ALL: [BatteryId; 4] = [BatteryId::B0, BatteryId::B1, BatteryId::B2, BatteryId::B3];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Proximity sensor operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityMode {
    #[default]
    Off,
    Distance,
    Proximity,
}

impl ProximityMode {
    pub fn wire_char(self) -> char {
        match self {
            ProximityMode::Off => 'o',
            ProximityMode::Distance => 'd',
            ProximityMode::Proximity => 'p',
        }
    }
}

impl FromStr for ProximityMode {
    type Err = String;

    /// Accepts the wire letter or any word starting with it ("off", "Distance", ...)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('o') => Ok(ProximityMode::Off),
            Some('d') => Ok(ProximityMode::Distance),
            Some('p') => Ok(ProximityMode::Proximity),
            _ => Err(format!("unknown proximity mode '{}'", s)),
        }
    }
}

/// Whether a hardware safety cutoff is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    #[default]
    Enabled,
    Disabled,
}

impl SafetyMode {
    pub fn wire_char(self) -> char {
        match self {
            SafetyMode::Enabled => 'e',
            SafetyMode::Disabled => 'd',
        }
    }

    pub fn is_enabled(self) -> bool {
        self == SafetyMode::Enabled
    }
}

impl FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e" | "enabled" | "1" | "true" => Ok(SafetyMode::Enabled),
            "d" | "disabled" | "0" | "false" => Ok(SafetyMode::Disabled),
            _ => Err(format!("unknown safety mode '{}'", s)),
        }
    }
}

/// Per-motor configuration register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorSetting {
    Direction,
    AccelRate,
    BrakeRate,
    AccelDelay,
    BrakeDelay,
}

impl MotorSetting {
    fn keyword(self) -> &'static str {
        match self {
            MotorSetting::Direction => "set-dir",
            MotorSetting::AccelRate => "config-acc-rate",
            MotorSetting::BrakeRate => "config-brak-rate",
            MotorSetting::AccelDelay => "config-acc-rate-delay",
            MotorSetting::BrakeDelay => "config-brak-rate-delay",
        }
    }
}

/// Speed and polarity for one motor in a `motors set` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorOutput {
    pub speed: u32,
    pub direction: u8,
}

impl MotorOutput {
    pub fn new(speed: u32, direction: u8) -> Self {
        Self { speed, direction }
    }

    pub fn stopped() -> Self {
        Self::default()
    }
}

/// Every command the device shell understands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMotors([MotorOutput; 2]),
    ConfigureMotor {
        motor: MotorId,
        setting: MotorSetting,
        value: u32,
    },
    GetMotorSpeed(MotorId),
    GetMotorDirection(MotorId),
    SetRelays(u8),
    SetProximityMode {
        sensor: ProximityId,
        mode: ProximityMode,
    },
    SetProximityThreshold {
        sensor: ProximityId,
        threshold: i32,
    },
    GetDistance(ProximityId),
    GetProximityState(ProximityId),
    SetEmergencyButtonMode(SafetyMode),
    GetEmergencyButton,
    SetTemperatureMode {
        sensor: TemperatureId,
        mode: SafetyMode,
    },
    SetTemperatureThreshold {
        sensor: TemperatureId,
        mode: SafetyMode,
        threshold: f32,
    },
    GetTemperature(TemperatureId),
    SetBatteryMode {
        channel: BatteryId,
        mode: SafetyMode,
    },
    SetBatteryThreshold {
        channel: BatteryId,
        mode: SafetyMode,
        threshold: f32,
    },
    GetBatteryInput(BatteryId),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMotors([m1, m2]) => write!(
                f,
                "motors set {} {} {} {}",
                m1.speed, m1.direction, m2.speed, m2.direction
            ),
            Command::ConfigureMotor {
                motor,
                setting,
                value,
            } => write!(f, "motor{} {} {}", motor.number(), setting.keyword(), value),
            Command::GetMotorSpeed(motor) => write!(f, "motor{} get-speed", motor.number()),
            Command::GetMotorDirection(motor) => write!(f, "motor{} get-dir", motor.number()),
            Command::SetRelays(mask) => write!(f, "relays set-relays {}", mask),
            Command::SetProximityMode { sensor, mode } => write!(
                f,
                "proxy config-mode p_{} {}",
                sensor.index(),
                mode.wire_char()
            ),
            Command::SetProximityThreshold { sensor, threshold } => {
                write!(f, "proxy set-threshold p_{} {}", sensor.index(), threshold)
            }
            Command::GetDistance(sensor) => write!(f, "proxy get-dis p_{}", sensor.index()),
            Command::GetProximityState(sensor) => {
                write!(f, "proxy get-prox-state p_{}", sensor.index())
            }
            Command::SetEmergencyButtonMode(mode) => {
                write!(f, "em_btn config-mode {}", mode.wire_char())
            }
            Command::GetEmergencyButton => write!(f, "em_btn get"),
            Command::SetTemperatureMode { sensor, mode } => write!(
                f,
                "mcp9808 config-sensor {} {}",
                sensor.index(),
                mode.wire_char()
            ),
            Command::SetTemperatureThreshold {
                sensor,
                mode,
                threshold,
            } => write!(
                f,
                "mcp9808 config-threshold {} {} {}",
                sensor.index(),
                mode.wire_char(),
                threshold
            ),
            Command::GetTemperature(sensor) => write!(f, "mcp9808 get-sensor {}", sensor.index()),
            Command::SetBatteryMode { channel, mode } => write!(
                f,
                "ads1115 config-input {} {}",
                channel.index(),
                mode.wire_char()
            ),
            Command::SetBatteryThreshold {
                channel,
                mode,
                threshold,
            } => write!(
                f,
                "ads1115 config-threshold {} {} {}",
                channel.index(),
                mode.wire_char(),
                truncate_threshold(*threshold)
            ),
            Command::GetBatteryInput(channel) => {
                write!(f, "ads1115 get-input {}", channel.index())
            }
        }
    }
}

/// Format a threshold and cut it to the device's field width
fn truncate_threshold(value: f32) -> String {
    value.to_string().chars().take(MAX_THRESHOLD_CHARS).collect()
}

/// The value line of a reply: its last non-empty line
pub fn payload(reply: &str) -> &str {
    reply
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

fn protocol_error(command: &Command, reply: &str, reason: impl Into<String>) -> DeviceError {
    DeviceError::Protocol {
        command: command.to_string(),
        reply: reply.to_string(),
        reason: reason.into(),
    }
}

/// Parse an integer reply
pub fn parse_int(command: &Command, reply: &str) -> Result<i32> {
    let value = payload(reply);
    value
        .parse::<i32>()
        .map_err(|e| protocol_error(command, reply, format!("not an integer: {}", e)))
}

/// Parse a decimal reply
pub fn parse_float(command: &Command, reply: &str) -> Result<f32> {
    let value = payload(reply);
    value
        .parse::<f32>()
        .map_err(|e| protocol_error(command, reply, format!("not a number: {}", e)))
}

/// Parse a motor polarity reply, which must be 0 or 1
pub fn parse_direction(command: &Command, reply: &str) -> Result<u8> {
    match parse_int(command, reply)? {
        0 => Ok(0),
        1 => Ok(1),
        other => Err(protocol_error(
            command,
            reply,
            format!("direction {} is not 0 or 1", other),
        )),
    }
}

/// Parse an ADC reply, which may carry a `"<N>: "` channel prefix
pub fn parse_adc(channel: BatteryId, command: &Command, reply: &str) -> Result<f32> {
    let value = payload(reply);
    let prefix = format!("{}:", channel.index());
    let value = value.strip_prefix(&prefix).unwrap_or(value).trim();
    value
        .parse::<f32>()
        .map_err(|e| protocol_error(command, reply, format!("not a number: {}", e)))
}

/// Parse a free-form state reply; only an empty reply is rejected
pub fn parse_state(command: &Command, reply: &str) -> Result<String> {
    match payload(reply) {
        "" => Err(protocol_error(command, reply, "empty reply")),
        state => Ok(state.to_string()),
    }
}
