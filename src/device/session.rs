// Synchronous command/response conversation with the device
//
// The shell has no request IDs, so correlation relies on strict alternation:
// one line out, one reply in. `&mut self` on every exchange keeps at most one
// command in flight.

use tracing::{debug, info};

use super::codec::{
    self, BatteryId, Command, MotorId, MotorOutput, MotorSetting, ProximityId, ProximityMode,
    SafetyMode, TemperatureId,
};
use super::error::{DeviceError, Result};
use super::transport::Transport;
use crate::config::{DeviceConfig, LINE_TERMINATOR, READ_DELIMITER};

/// Drop the shell's echo of `line` from the front of `reply`
fn strip_echo<'a>(line: &str, reply: &'a str) -> &'a str {
    match reply.split_once('\n') {
        Some((first, rest)) if first.trim() == line => rest.trim(),
        None if reply.trim() == line => "",
        _ => reply.trim(),
    }
}

pub struct Session<T: Transport> {
    transport: T,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send one command and wait for its reply
    pub fn send(&mut self, command: &Command) -> Result<String> {
        self.exchange(command, true)
    }

    /// Same as `send` but keeps the exchange out of the wire log (for polling)
    pub fn send_quiet(&mut self, command: &Command) -> Result<String> {
        self.exchange(command, false)
    }

    fn exchange(&mut self, command: &Command, log: bool) -> Result<String> {
        if !self.transport.is_connected() {
            return Err(DeviceError::Disconnected);
        }

        let line = command.to_string();
        let framed = format!("{}{}", line, LINE_TERMINATOR);
        self.transport.write(framed.as_bytes(), log)?;

        let reply = self
            .transport
            .read_until(READ_DELIMITER, log)
            .map_err(|e| match e {
                DeviceError::Timeout { .. } => DeviceError::Timeout {
                    command: line.clone(),
                },
                other => other,
            })?;

        Ok(strip_echo(&line, &reply).to_string())
    }

    fn exchange_with(&mut self, command: &Command, log: bool) -> Result<String> {
        if log {
            self.send(command)
        } else {
            self.send_quiet(command)
        }
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Push the full configuration: motors, proximity, emergency button,
    /// temperature, battery. Safety cutoffs go last, once the motors they
    /// guard are configured.
    pub fn initialize(&mut self, config: &DeviceConfig) -> Result<()> {
        info!("Initializing device");

        for motor in MotorId::ALL {
            let cfg = &config.motors[motor.index()];
            self.configure_motor(motor, MotorSetting::Direction, u32::from(cfg.direction))?;
            self.configure_motor(motor, MotorSetting::AccelRate, cfg.accel_rate)?;
            self.configure_motor(motor, MotorSetting::BrakeRate, cfg.brake_rate)?;
            self.configure_motor(motor, MotorSetting::AccelDelay, cfg.accel_delay)?;
            self.configure_motor(motor, MotorSetting::BrakeDelay, cfg.brake_delay)?;
        }
        debug!("Motors configured");

        for sensor in ProximityId::ALL {
            let cfg = &config.proximity[sensor.index()];
            self.set_proximity_mode(sensor, cfg.mode)?;
            self.set_proximity_threshold(sensor, cfg.threshold)?;
        }
        debug!("Proximity sensors configured");

        self.set_emergency_button_mode(config.emergency_button.mode)?;
        debug!("Emergency button configured");

        for sensor in TemperatureId::ALL {
            self.set_temperature_mode(sensor, config.temperature[sensor.index()].safety)?;
        }
        for sensor in TemperatureId::ALL {
            let cfg = &config.temperature[sensor.index()];
            self.set_temperature_threshold(sensor, cfg.safety, cfg.threshold_temp)?;
        }
        debug!("Temperature sensors configured");

        for channel in BatteryId::ALL {
            self.set_battery_mode(channel, config.battery[channel.index()].safety)?;
        }
        for channel in BatteryId::ALL {
            let cfg = &config.battery[channel.index()];
            self.set_battery_threshold(channel, cfg.safety, cfg.threshold_voltage)?;
        }
        debug!("Battery monitor configured");

        info!("Device initialized");
        Ok(())
    }

    // === Motors ===

    pub fn set_motors(&mut self, outputs: [MotorOutput; 2]) -> Result<()> {
        self.send(&Command::SetMotors(outputs)).map(drop)
    }

    pub fn configure_motor(&mut self, motor: MotorId, setting: MotorSetting, value: u32) -> Result<()> {
        self.send(&Command::ConfigureMotor {
            motor,
            setting,
            value,
        })
        .map(drop)
    }

    pub fn get_motor_speed(&mut self, motor: MotorId, log: bool) -> Result<i32> {
        let command = Command::GetMotorSpeed(motor);
        let reply = self.exchange_with(&command, log)?;
        codec::parse_int(&command, &reply)
    }

    pub fn get_motor_direction(&mut self, motor: MotorId, log: bool) -> Result<u8> {
        let command = Command::GetMotorDirection(motor);
        let reply = self.exchange_with(&command, log)?;
        codec::parse_direction(&command, &reply)
    }

    // === Relays ===

    pub fn set_relays(&mut self, mask: u8) -> Result<()> {
        self.send(&Command::SetRelays(mask)).map(drop)
    }

    // === Proximity ===

    pub fn set_proximity_mode(&mut self, sensor: ProximityId, mode: ProximityMode) -> Result<()> {
        self.send(&Command::SetProximityMode { sensor, mode }).map(drop)
    }

    pub fn set_proximity_threshold(&mut self, sensor: ProximityId, threshold: i32) -> Result<()> {
        self.send(&Command::SetProximityThreshold { sensor, threshold })
            .map(drop)
    }

    pub fn get_distance(&mut self, sensor: ProximityId, log: bool) -> Result<i32> {
        let command = Command::GetDistance(sensor);
        let reply = self.exchange_with(&command, log)?;
        codec::parse_int(&command, &reply)
    }

    pub fn get_proximity_state(&mut self, sensor: ProximityId) -> Result<i32> {
        let command = Command::GetProximityState(sensor);
        let reply = self.send(&command)?;
        codec::parse_int(&command, &reply)
    }

    // === Emergency button ===

    pub fn set_emergency_button_mode(&mut self, mode: SafetyMode) -> Result<()> {
        self.send(&Command::SetEmergencyButtonMode(mode)).map(drop)
    }

    pub fn get_emergency_button(&mut self, log: bool) -> Result<String> {
        let command = Command::GetEmergencyButton;
        let reply = self.exchange_with(&command, log)?;
        codec::parse_state(&command, &reply)
    }

    // === Temperature ===

    pub fn set_temperature_mode(&mut self, sensor: TemperatureId, mode: SafetyMode) -> Result<()> {
        self.send(&Command::SetTemperatureMode { sensor, mode }).map(drop)
    }

    pub fn set_temperature_threshold(
        &mut self,
        sensor: TemperatureId,
        mode: SafetyMode,
        threshold: f32,
    ) -> Result<()> {
        self.send(&Command::SetTemperatureThreshold {
            sensor,
            mode,
            threshold,
        })
        .map(drop)
    }

    pub fn get_temperature(&mut self, sensor: TemperatureId, log: bool) -> Result<f32> {
        let command = Command::GetTemperature(sensor);
        let reply = self.exchange_with(&command, log)?;
        codec::parse_float(&command, &reply)
    }

    // === Battery ADC ===

    pub fn set_battery_mode(&mut self, channel: BatteryId, mode: SafetyMode) -> Result<()> {
        self.send(&Command::SetBatteryMode { channel, mode }).map(drop)
    }

    pub fn set_battery_threshold(
        &mut self,
        channel: BatteryId,
        mode: SafetyMode,
        threshold: f32,
    ) -> Result<()> {
        self.send(&Command::SetBatteryThreshold {
            channel,
            mode,
            threshold,
        })
        .map(drop)
    }

    /// Raw ADC reading for one battery tap
    pub fn get_battery_input(&mut self, channel: BatteryId, log: bool) -> Result<f32> {
        let command = Command::GetBatteryInput(channel);
        let reply = self.exchange_with(&command, log)?;
        codec::parse_adc(channel, &command, &reply)
    }
}
