// Message types exchanged with intent sources and status consumers

use serde::{Deserialize, Serialize};

use crate::vehicle::{MotionIntent, MovementState, RelayBank};

/// Request from an input source -> runtime
// internally tagged: {"intent": "turn_left"} or {"intent": "toggle_relay", "relay": 3}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Forward,
    Back,
    TurnLeft,
    TurnRight,
    RotateLeft,
    RotateRight,
    Stop,
    SetHandbrake { engaged: bool },
    ToggleRelay { relay: u8 },
    SetRemoteControl { enabled: bool },
}

impl Intent {
    /// The directional part of this intent, if it has one
    pub fn motion(&self) -> Option<MotionIntent> {
        match self {
            Intent::Forward => Some(MotionIntent::Forward),
            Intent::Back => Some(MotionIntent::Back),
            Intent::TurnLeft => Some(MotionIntent::TurnLeft),
            Intent::TurnRight => Some(MotionIntent::TurnRight),
            Intent::RotateLeft => Some(MotionIntent::RotateLeft),
            Intent::RotateRight => Some(MotionIntent::RotateRight),
            Intent::Stop => Some(MotionIntent::Stop),
            _ => None,
        }
    }

    /// Whether this intent needs remote control to be enabled.
    /// Stopping and engaging the handbrake are always allowed.
    pub fn requires_control(&self) -> bool {
        match self {
            Intent::Stop | Intent::SetRemoteControl { .. } => false,
            Intent::SetHandbrake { engaged } => !engaged,
            _ => true,
        }
    }
}

/// Vehicle state published every loop tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub movement: MovementState,
    pub handbrake: bool,
    pub relays: RelayBank,
    pub remote_control: bool,
}

/// One round of sensor polling. `None` marks a reading the device could not deliver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Signed: negative while a motor runs against its forward polarity
    pub motor_speeds: [Option<i32>; 2],
    pub distances: [Option<i32>; 4],
    pub temperatures: [Option<f32>; 3],
    /// Per-cell volts, -1 where unavailable
    pub cell_voltages: [f32; 4],
    pub emergency_button: Option<String>,
}

/// Health of the device link
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    DeviceError,
    Disconnected,
}
