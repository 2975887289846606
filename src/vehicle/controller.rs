// High-level vehicle API over the device session
//
// Owns the session exclusively together with the runtime state derived from
// it (movement, handbrake, relays, cached readings). State changes are only
// recorded after the device accepted the command, so a failed send leaves the
// in-memory view matching the hardware.

use tracing::{debug, info, warn};

use super::motion::{self, MotionIntent, MovementState, RotateDirection};
use super::relays::RelayBank;
use super::sensors::{self, BatteryChannelState, TemperatureChannelState, INVALID_VOLTAGE};
use crate::config::DeviceConfig;
use crate::device::{
    BatteryId, DeviceError, MotorId, ProximityId, Result, Session, TemperatureId, Transport,
};
use crate::messages::{Intent, SensorSnapshot, VehicleStatus};

/// Keep a reading the device answered with garbage as "unavailable"; pass other errors up
fn available<V>(reading: Result<V>) -> Result<Option<V>> {
    match reading {
        Ok(value) => Ok(Some(value)),
        Err(e @ DeviceError::Protocol { .. }) => {
            warn!("Reading unavailable: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy)]
enum PollStep {
    MotorSpeed(MotorId),
    Distance(ProximityId),
    Temperature(TemperatureId),
    BatteryTap(BatteryId),
    EmergencyButton,
}

/// Readings of one sensor round, in order. Battery taps run b0..b3 so the
/// cell chain resolves on the last one.
const POLL_STEPS: [PollStep; 14] = [
    PollStep::MotorSpeed(MotorId::Motor1),
    PollStep::MotorSpeed(MotorId::Motor2),
    PollStep::Distance(ProximityId::P0),
    PollStep::Distance(ProximityId::P1),
    PollStep::Distance(ProximityId::P2),
    PollStep::Distance(ProximityId::P3),
    PollStep::Temperature(TemperatureId::T0),
    PollStep::Temperature(TemperatureId::T1),
    PollStep::Temperature(TemperatureId::T2),
    PollStep::BatteryTap(BatteryId::B0),
    PollStep::BatteryTap(BatteryId::B1),
    PollStep::BatteryTap(BatteryId::B2),
    PollStep::BatteryTap(BatteryId::B3),
    PollStep::EmergencyButton,
];

/// Progress through one sensor round, advanced a reading at a time by [`Vehicle::poll_next`]
#[derive(Debug, Clone)]
pub struct PollRound {
    next: usize,
    raw_taps: [f32; 4],
    snapshot: SensorSnapshot,
}

impl PollRound {
    pub fn new() -> Self {
        Self {
            next: 0,
            raw_taps: [INVALID_VOLTAGE; 4],
            snapshot: SensorSnapshot::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next >= POLL_STEPS.len()
    }

    pub fn into_snapshot(self) -> SensorSnapshot {
        self.snapshot
    }
}

impl Default for PollRound {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Vehicle<T: Transport> {
    session: Session<T>,
    config: DeviceConfig,
    movement: MovementState,
    handbrake: bool,
    relays: RelayBank,
    batteries: [BatteryChannelState; 4],
    temperatures: [TemperatureChannelState; 3],
}

impl<T: Transport> Vehicle<T> {
    /// Wrap a session. The handbrake starts engaged.
    pub fn new(session: Session<T>, config: DeviceConfig) -> Self {
        let batteries = BatteryId::ALL.map(|b| BatteryChannelState::new(&config.battery[b.index()]));
        let temperatures =
            TemperatureId::ALL.map(|t| TemperatureChannelState::new(&config.temperature[t.index()]));
        Self {
            session,
            config,
            movement: MovementState::Stopped,
            handbrake: true,
            relays: RelayBank::default(),
            batteries,
            temperatures,
        }
    }

    /// Push the configuration to the device
    pub fn initialize(&mut self) -> Result<()> {
        self.session.initialize(&self.config)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn movement(&self) -> MovementState {
        self.movement
    }

    pub fn handbrake(&self) -> bool {
        self.handbrake
    }

    pub fn relays(&self) -> RelayBank {
        self.relays
    }

    pub fn batteries(&self) -> &[BatteryChannelState; 4] {
        &self.batteries
    }

    pub fn temperatures(&self) -> &[TemperatureChannelState; 3] {
        &self.temperatures
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn status(&self, remote_control: bool) -> VehicleStatus {
        VehicleStatus {
            movement: self.movement,
            handbrake: self.handbrake,
            relays: self.relays,
            remote_control,
        }
    }

    /// Apply one intent from an input source
    pub fn apply(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::SetHandbrake { engaged } => self.set_handbrake(engaged),
            Intent::ToggleRelay { relay } => self.toggle_relay(relay).map(drop),
            Intent::SetRemoteControl { .. } => Ok(()),
            other => match other.motion() {
                Some(motion) => self.drive(motion),
                None => Ok(()),
            },
        }
    }

    fn drive(&mut self, intent: MotionIntent) -> Result<()> {
        let Some(step) = motion::plan(self.movement, self.handbrake, intent, &self.config.motors)
        else {
            debug!("{:?} while {:?}: keeping movement", intent, self.movement);
            return Ok(());
        };

        if self.handbrake {
            debug!("Movement blocked by handbrake");
        }
        self.session.set_motors(step.outputs)?;
        if step.next != self.movement {
            debug!("{:?}: {:?} -> {:?}", intent, self.movement, step.next);
        }
        self.movement = step.next;
        Ok(())
    }

    pub fn go_forward(&mut self) -> Result<()> {
        self.drive(MotionIntent::Forward)
    }

    pub fn go_back(&mut self) -> Result<()> {
        self.drive(MotionIntent::Back)
    }

    pub fn turn_left(&mut self) -> Result<()> {
        self.drive(MotionIntent::TurnLeft)
    }

    pub fn turn_right(&mut self) -> Result<()> {
        self.drive(MotionIntent::TurnRight)
    }

    pub fn rotate_in_place(&mut self, direction: RotateDirection) -> Result<()> {
        self.drive(direction.into())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.drive(MotionIntent::Stop)
    }

    /// Engaging always stops the motors. The flag itself is set even if the
    /// stop command fails, so no later intent can drive.
    pub fn set_handbrake(&mut self, engaged: bool) -> Result<()> {
        self.handbrake = engaged;
        info!("Handbrake {}", if engaged { "engaged" } else { "released" });
        if engaged {
            self.drive(MotionIntent::Stop)
        } else {
            Ok(())
        }
    }

    /// Flip one relay and send the whole bank; returns the new mask
    pub fn toggle_relay(&mut self, relay: u8) -> Result<u8> {
        let next = self.relays.toggled(relay)?;
        debug!("Toggling relay {}", relay);
        self.session.set_relays(next.mask())?;
        self.relays = next;
        Ok(next.mask())
    }

    // === Polling ===

    /// Speed of one motor, negative when it turns against its forward polarity
    pub fn get_motor_speed(&mut self, motor: MotorId, log: bool) -> Result<i32> {
        let speed = self.session.get_motor_speed(motor, log)?;
        let direction = self.session.get_motor_direction(motor, log)?;
        Ok(sensors::signed_speed(
            speed,
            direction,
            self.config.motors[motor.index()].direction,
        ))
    }

    pub fn get_distance(&mut self, sensor: ProximityId, log: bool) -> Result<i32> {
        self.session.get_distance(sensor, log)
    }

    pub fn get_proximity_state(&mut self, sensor: ProximityId) -> Result<i32> {
        self.session.get_proximity_state(sensor)
    }

    pub fn get_temperature(&mut self, sensor: TemperatureId, log: bool) -> Result<f32> {
        let temp = self.session.get_temperature(sensor, log)?;
        let channel = &mut self.temperatures[sensor.index()];
        channel.last_temp = Some(temp);
        if channel.is_hot() {
            warn!(
                "Temperature sensor {} at {:.1}°C (limit {:.1}°C)",
                sensor.index(),
                temp,
                channel.threshold_temp
            );
        }
        Ok(temp)
    }

    pub fn get_emergency_button(&mut self, log: bool) -> Result<String> {
        self.session.get_emergency_button(log)
    }

    /// Read all battery taps and resolve them into cell voltages
    pub fn get_cell_voltages(&mut self, log: bool) -> Result<[f32; 4]> {
        let mut raw = [INVALID_VOLTAGE; 4];
        for channel in BatteryId::ALL {
            raw[channel.index()] = self.session.get_battery_input(channel, log)?;
        }
        Ok(self.record_cells(raw))
    }

    fn record_cells(&mut self, raw: [f32; 4]) -> [f32; 4] {
        let cells = sensors::resolve_cells(raw);
        for channel in BatteryId::ALL {
            let state = &mut self.batteries[channel.index()];
            state.last_cell_voltage = cells[channel.index()];
            if state.is_low() {
                warn!(
                    "Battery cell {} at {:.2} V (limit {:.2} V)",
                    channel.index(),
                    state.last_cell_voltage,
                    state.threshold_voltage
                );
            }
        }
        cells
    }

    /// Take the next reading of `round` without wire logging; true once the round is complete.
    ///
    /// Unparseable readings become `None` (-1 for battery taps); transport
    /// failures are returned and leave the round where it was.
    pub fn poll_next(&mut self, round: &mut PollRound) -> Result<bool> {
        let Some(&step) = POLL_STEPS.get(round.next) else {
            return Ok(true);
        };
        let snapshot = &mut round.snapshot;

        match step {
            PollStep::MotorSpeed(motor) => {
                snapshot.motor_speeds[motor.index()] = available(self.get_motor_speed(motor, false))?;
            }
            PollStep::Distance(sensor) => {
                snapshot.distances[sensor.index()] = available(self.get_distance(sensor, false))?;
            }
            PollStep::Temperature(sensor) => {
                snapshot.temperatures[sensor.index()] =
                    available(self.get_temperature(sensor, false))?;
            }
            PollStep::BatteryTap(channel) => {
                round.raw_taps[channel.index()] =
                    available(self.session.get_battery_input(channel, false))?
                        .unwrap_or(INVALID_VOLTAGE);
                if channel == BatteryId::B3 {
                    snapshot.cell_voltages = self.record_cells(round.raw_taps);
                }
            }
            PollStep::EmergencyButton => {
                snapshot.emergency_button = available(self.get_emergency_button(false))?;
            }
        }

        round.next += 1;
        Ok(round.is_complete())
    }

    /// Poll every sensor once, back to back
    pub fn poll_sensors(&mut self) -> Result<SensorSnapshot> {
        let mut round = PollRound::new();
        while !self.poll_next(&mut round)? {}
        Ok(round.into_snapshot())
    }

    /// Close the link and forget runtime state
    pub fn disconnect(&mut self) {
        self.session.disconnect();
        self.movement = MovementState::Stopped;
        self.handbrake = true;
        self.relays = RelayBank::default();
        for battery in &mut self.batteries {
            battery.last_cell_voltage = INVALID_VOLTAGE;
        }
        for temp in &mut self.temperatures {
            temp.last_temp = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;
    use crate::device::mock::MockTransport;

    fn vehicle_with(dir1: u8, dir2: u8) -> (Vehicle<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let mut config = DeviceConfig::default();
        config.motors = [
            MotorConfig {
                max_speed: 100,
                direction: dir1,
                ..Default::default()
            },
            MotorConfig {
                max_speed: 100,
                direction: dir2,
                ..Default::default()
            },
        ];
        (Vehicle::new(Session::new(mock.clone()), config), mock)
    }

    fn released() -> (Vehicle<MockTransport>, MockTransport) {
        let (mut vehicle, mock) = vehicle_with(0, 0);
        vehicle.set_handbrake(false).unwrap();
        (vehicle, mock)
    }

    #[test]
    fn test_starts_with_handbrake_engaged() {
        let (mut vehicle, mock) = vehicle_with(0, 0);
        assert!(vehicle.handbrake());
        vehicle.go_forward().unwrap();
        assert_eq!(mock.written(), vec!["motors set 0 0 0 0"]);
        assert_eq!(vehicle.movement(), MovementState::Stopped);
    }

    #[test]
    fn test_release_sends_nothing() {
        let (vehicle, mock) = released();
        assert!(!vehicle.handbrake());
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_forward_then_left() {
        let (mut vehicle, mock) = released();
        vehicle.go_forward().unwrap();
        vehicle.turn_left().unwrap();
        assert_eq!(
            mock.written(),
            vec!["motors set 100 0 100 0", "motors set 50 0 100 0"]
        );
        assert_eq!(vehicle.movement(), MovementState::ForwardLeft);
    }

    #[test]
    fn test_handbrake_blocks_forward() {
        let (mut vehicle, mock) = vehicle_with(0, 0);
        vehicle.go_forward().unwrap();
        assert_eq!(mock.written(), vec!["motors set 0 0 0 0"]);
        assert_eq!(vehicle.movement(), MovementState::Stopped);
        assert!(vehicle.handbrake());
    }

    #[test]
    fn test_engaging_handbrake_stops_from_any_state() {
        for state in MovementState::ALL {
            let (mut vehicle, mock) = released();
            vehicle.movement = state;
            vehicle.set_handbrake(true).unwrap();
            assert_eq!(vehicle.movement(), MovementState::Stopped);
            assert_eq!(mock.written(), vec!["motors set 0 0 0 0"]);
        }
    }

    #[test]
    fn test_repeated_forward_sends_once() {
        let (mut vehicle, mock) = released();
        vehicle.go_forward().unwrap();
        vehicle.go_forward().unwrap();
        assert_eq!(mock.written().len(), 1);
        assert_eq!(vehicle.movement(), MovementState::Forward);
    }

    #[test]
    fn test_forward_to_back_passes_through_stop() {
        let (mut vehicle, mock) = vehicle_with(1, 0);
        vehicle.set_handbrake(false).unwrap();
        vehicle.go_forward().unwrap();
        vehicle.go_back().unwrap();
        assert_eq!(vehicle.movement(), MovementState::Stopped);
        vehicle.go_back().unwrap();
        assert_eq!(vehicle.movement(), MovementState::Back);
        assert_eq!(
            mock.written(),
            vec![
                "motors set 100 1 100 0",
                "motors set 0 0 0 0",
                "motors set 100 0 100 1"
            ]
        );
    }

    #[test]
    fn test_failed_send_keeps_state() {
        let (mut vehicle, mock) = released();
        vehicle.go_forward().unwrap();
        mock.push_timeout();
        let err = vehicle.turn_right().unwrap_err();
        assert!(matches!(err, DeviceError::Timeout { .. }));
        assert_eq!(vehicle.movement(), MovementState::Forward);

        mock.set_fail_writes(true);
        assert!(vehicle.stop().is_err());
        assert_eq!(vehicle.movement(), MovementState::Forward);
    }

    #[test]
    fn test_handbrake_flag_set_even_if_stop_fails() {
        let (mut vehicle, mock) = released();
        vehicle.go_forward().unwrap();
        mock.push_timeout();
        assert!(vehicle.set_handbrake(true).is_err());
        assert!(vehicle.handbrake());
        assert_eq!(vehicle.movement(), MovementState::Forward);
    }

    #[test]
    fn test_rotate_in_place() {
        let (mut vehicle, mock) = released();
        vehicle.rotate_in_place(RotateDirection::Right).unwrap();
        assert_eq!(vehicle.movement(), MovementState::RotateRight);
        assert_eq!(mock.written(), vec!["motors set 50 0 50 1"]);
    }

    #[test]
    fn test_toggle_relay_twice_restores_mask() {
        let (mut vehicle, mock) = released();
        assert_eq!(vehicle.toggle_relay(3).unwrap(), 8);
        assert_eq!(vehicle.toggle_relay(0).unwrap(), 9);
        assert_eq!(vehicle.toggle_relay(3).unwrap(), 1);
        assert_eq!(
            mock.written(),
            vec![
                "relays set-relays 8",
                "relays set-relays 9",
                "relays set-relays 1"
            ]
        );
    }

    #[test]
    fn test_toggle_relay_errors() {
        let (mut vehicle, mock) = released();
        assert!(matches!(
            vehicle.toggle_relay(8),
            Err(DeviceError::InvalidRelay(8))
        ));
        assert!(mock.written().is_empty());

        mock.push_timeout();
        assert!(vehicle.toggle_relay(2).is_err());
        assert_eq!(vehicle.relays().mask(), 0);
    }

    #[test]
    fn test_apply_dispatches_intents() {
        let (mut vehicle, mock) = vehicle_with(0, 0);
        vehicle.apply(Intent::SetHandbrake { engaged: false }).unwrap();
        vehicle.apply(Intent::Back).unwrap();
        vehicle.apply(Intent::TurnRight).unwrap();
        vehicle.apply(Intent::ToggleRelay { relay: 1 }).unwrap();
        vehicle.apply(Intent::SetRemoteControl { enabled: false }).unwrap();
        assert_eq!(vehicle.movement(), MovementState::BackRight);
        assert_eq!(vehicle.relays().mask(), 2);
        assert_eq!(
            mock.written(),
            vec![
                "motors set 100 1 100 1",
                "motors set 100 1 50 1",
                "relays set-relays 2"
            ]
        );
    }

    #[test]
    fn test_motor_speed_sign() {
        let (mut vehicle, mock) = vehicle_with(0, 1);
        mock.push_reply("80");
        mock.push_reply("1");
        mock.push_reply("motor2 get-speed\r\n60");
        mock.push_reply("motor2 get-dir\r\n1");
        assert_eq!(vehicle.get_motor_speed(MotorId::Motor1, true).unwrap(), -80);
        assert_eq!(vehicle.get_motor_speed(MotorId::Motor2, true).unwrap(), 60);
    }

    #[test]
    fn test_cell_voltages_chain() {
        let (mut vehicle, mock) = released();
        mock.push_reply("0: 100");
        mock.push_reply("1: 150");
        mock.push_reply("2: -1");
        mock.push_reply("3: 900");
        let cells = vehicle.get_cell_voltages(true).unwrap();
        assert!((cells[0] - 0.9261).abs() < 1e-3);
        assert!((cells[1] - 0.3430).abs() < 1e-3);
        assert_eq!(cells[2], INVALID_VOLTAGE);
        assert_eq!(cells[3], INVALID_VOLTAGE);
        assert_eq!(vehicle.batteries()[1].last_cell_voltage, cells[1]);
        assert!(!vehicle.batteries()[3].is_valid());
    }

    #[test]
    fn test_invalid_first_tap_invalidates_all() {
        let (mut vehicle, mock) = released();
        for reply in ["-1", "150", "300", "450"] {
            mock.push_reply(reply);
        }
        assert_eq!(vehicle.get_cell_voltages(true).unwrap(), [INVALID_VOLTAGE; 4]);
    }

    #[test]
    fn test_poll_sensors_marks_unparseable_readings() {
        let (mut vehicle, mock) = released();
        // motor speeds/directions
        for reply in ["10", "0", "20", "1"] {
            mock.push_reply(reply);
        }
        // distances, one broken
        for reply in ["12", "n/a", "30", "44"] {
            mock.push_reply(reply);
        }
        // temperatures
        for reply in ["21.5", "22.0", "70.5"] {
            mock.push_reply(reply);
        }
        // battery taps, second broken
        for reply in ["0: 100", "1: ?", "2: 300", "3: 450"] {
            mock.push_reply(reply);
        }
        mock.push_reply("released");

        let snapshot = vehicle.poll_sensors().unwrap();
        assert_eq!(snapshot.motor_speeds, [Some(10), Some(-20)]);
        assert_eq!(snapshot.distances, [Some(12), None, Some(30), Some(44)]);
        assert_eq!(snapshot.temperatures, [Some(21.5), Some(22.0), Some(70.5)]);
        assert!(snapshot.cell_voltages[0] > 0.0);
        assert_eq!(snapshot.cell_voltages[1..], [INVALID_VOLTAGE; 3]);
        assert_eq!(snapshot.emergency_button.as_deref(), Some("released"));
        assert!(vehicle.temperatures()[2].is_hot());
        assert_eq!(mock.quiet_writes(), mock.written().len());
    }

    #[test]
    fn test_poll_round_takes_one_reading_per_step() {
        let (mut vehicle, mock) = released();
        let mut round = PollRound::new();
        mock.push_reply("10");
        mock.push_reply("0");
        assert!(!vehicle.poll_next(&mut round).unwrap());
        assert_eq!(mock.written(), vec!["motor1 get-speed", "motor1 get-dir"]);

        // A motor command fits between two readings
        vehicle.stop().unwrap();
        mock.push_timeout();
        assert!(vehicle.poll_next(&mut round).is_err());
        mock.push_reply("20");
        mock.push_reply("0");
        assert!(!vehicle.poll_next(&mut round).unwrap());

        let mut steps = 3;
        while !vehicle.poll_next(&mut round).unwrap() {
            steps += 1;
        }
        assert_eq!(steps, POLL_STEPS.len());
        assert!(round.is_complete());
        assert!(vehicle.poll_next(&mut round).unwrap());

        let snapshot = round.into_snapshot();
        assert_eq!(snapshot.motor_speeds, [Some(10), Some(20)]);
        assert_eq!(
            mock.written()[2..5],
            ["motors set 0 0 0 0", "motor2 get-speed", "motor2 get-speed"]
        );
    }

    #[test]
    fn test_poll_sensors_aborts_on_timeout() {
        let (mut vehicle, mock) = released();
        mock.push_timeout();
        assert!(matches!(
            vehicle.poll_sensors(),
            Err(DeviceError::Timeout { .. })
        ));
        assert_eq!(mock.written().len(), 1);
    }

    #[test]
    fn test_disconnect_resets_runtime_state() {
        let (mut vehicle, _mock) = released();
        vehicle.go_forward().unwrap();
        vehicle.toggle_relay(5).unwrap();
        vehicle.disconnect();
        vehicle.disconnect();
        assert!(!vehicle.is_connected());
        assert_eq!(vehicle.movement(), MovementState::Stopped);
        assert!(vehicle.handbrake());
        assert_eq!(vehicle.relays().mask(), 0);
        assert!(matches!(vehicle.go_forward(), Err(DeviceError::Disconnected)));
    }
}
