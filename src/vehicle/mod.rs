// Vehicle control for the Pluto two-motor platform
//
// Provides:
// - Directional state machine with handbrake interlock
// - Sensor conversion (battery cell chain, signed motor speed)
// - `Vehicle`, the session-owning API used by the runtime

mod controller;
pub mod motion;
mod relays;
pub mod sensors;

pub use controller::{PollRound, Vehicle};
pub use motion::{MotionIntent, MovementState, RotateDirection};
pub use relays::RelayBank;
pub use sensors::{BatteryChannelState, TemperatureChannelState};
