// Device link for the Pluto vehicle controller board
//
// Provides:
// - Serial transport with reply cleaning and wire logging
// - Command codec for the board's text shell
// - Synchronous session with typed operations

pub mod codec;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod session;
pub mod transport;

pub use codec::{
    BatteryId, Command, MotorId, MotorOutput, MotorSetting, ProximityId, ProximityMode, SafetyMode,
    TemperatureId,
};
pub use error::{DeviceError, Result};
pub use session::Session;
pub use transport::{list_ports, LogDirection, LogSink, PortInfo, SerialTransport, TracingLogSink, Transport};
