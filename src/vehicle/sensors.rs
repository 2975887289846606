// Conversion of raw device readings into physical units
//
// Battery taps are wired cumulatively: ADC input N sees the stack voltage up
// to cell N through a resistor divider and a protection diode. Individual
// cells are recovered by subtracting the previous tap.

use serde::{Deserialize, Serialize};

use crate::config::{BatteryChannelConfig, TemperatureChannelConfig};
use crate::device::BatteryId;

/// Divider resistor to ground (ohms)
pub const R1_OHMS: f32 = 3300.0;
/// Divider resistor to the tap (ohms)
pub const R2_OHMS: f32 = 20_000.0;
/// Diode drop on taps b1..b3 (volts)
pub const DIODE_DROP_1: f32 = 0.36;
/// Diode drop on tap b0 (volts)
pub const DIODE_DROP_2: f32 = 0.32;

/// Marker for a reading that is missing or unusable
pub const INVALID_VOLTAGE: f32 = -1.0;

/// The ADC reports millivolts
const MILLIVOLTS_PER_VOLT: f32 = 1000.0;

pub fn diode_drop(channel: BatteryId) -> f32 {
    match channel {
        BatteryId::B0 => DIODE_DROP_2,
        BatteryId::B1 | BatteryId::B2 | BatteryId::B3 => DIODE_DROP_1,
    }
}

/// Cumulative voltage at a tap, or `INVALID_VOLTAGE` for a negative raw reading
pub fn tap_voltage(channel: BatteryId, raw_mv: f32) -> f32 {
    if raw_mv < 0.0 {
        return INVALID_VOLTAGE;
    }
    (raw_mv / MILLIVOLTS_PER_VOLT / R1_OHMS) * R2_OHMS + diode_drop(channel)
}

/// Resolve four cumulative tap readings into per-cell voltages.
///
/// An invalid tap invalidates itself and every cell above it.
pub fn resolve_cells(raw_mv: [f32; 4]) -> [f32; 4] {
    let mut cells = [INVALID_VOLTAGE; 4];
    let mut below = 0.0;

    for channel in BatteryId::ALL {
        let i = channel.index();
        let tap = tap_voltage(channel, raw_mv[i]);
        if tap == INVALID_VOLTAGE {
            break;
        }
        cells[i] = tap - below;
        below = tap;
    }
    cells
}

/// Attach a sign to a speed magnitude: negative when the motor runs against its forward polarity
pub fn signed_speed(speed: i32, live_direction: u8, forward_direction: u8) -> i32 {
    if live_direction != forward_direction {
        -speed.abs()
    } else {
        speed
    }
}

/// Runtime view of one battery cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryChannelState {
    pub safety_enabled: bool,
    pub threshold_voltage: f32,
    pub last_cell_voltage: f32,
}

impl BatteryChannelState {
    pub fn new(config: &BatteryChannelConfig) -> Self {
        Self {
            safety_enabled: config.safety.is_enabled(),
            threshold_voltage: config.threshold_voltage,
            last_cell_voltage: INVALID_VOLTAGE,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.last_cell_voltage != INVALID_VOLTAGE
    }

    /// Valid reading below the configured cutoff on a guarded cell
    pub fn is_low(&self) -> bool {
        self.safety_enabled && self.is_valid() && self.last_cell_voltage < self.threshold_voltage
    }
}

/// Runtime view of one temperature sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureChannelState {
    pub safety_enabled: bool,
    pub threshold_temp: f32,
    pub last_temp: Option<f32>,
}

impl TemperatureChannelState {
    pub fn new(config: &TemperatureChannelConfig) -> Self {
        Self {
            safety_enabled: config.safety.is_enabled(),
            threshold_temp: config.threshold_temp,
            last_temp: None,
        }
    }

    pub fn is_hot(&self) -> bool {
        self.safety_enabled && self.last_temp.is_some_and(|t| t >= self.threshold_temp)
    }
}
