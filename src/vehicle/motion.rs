// Directional state machine for the two-motor differential drive
//
// Converts intents into a (speed, polarity) pair per motor. The planner is
// pure: it only decides which `motors set` to issue and which state follows
// once the device has accepted it.
//
// Reversing travel always goes through Stopped: an opposite-direction intent
// while moving brakes, and only the next one drives the other way.

use serde::{Deserialize, Serialize};

use crate::config::MotorConfig;
use crate::device::MotorOutput;

/// Current movement of the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    #[default]
    Stopped,
    Forward,
    Back,
    ForwardLeft,
    ForwardRight,
    BackLeft,
    BackRight,
    RotateLeft,
    RotateRight,
}

impl MovementState {
    pub const ALL: [MovementState; 9] = [
        MovementState::Stopped,
        MovementState::Forward,
        MovementState::Back,
        MovementState::ForwardLeft,
        MovementState::ForwardRight,
        MovementState::BackLeft,
        MovementState::BackRight,
        MovementState::RotateLeft,
        MovementState::RotateRight,
    ];

    pub fn is_forward(self) -> bool {
        matches!(
            self,
            MovementState::Forward | MovementState::ForwardLeft | MovementState::ForwardRight
        )
    }

    pub fn is_backward(self) -> bool {
        matches!(
            self,
            MovementState::Back | MovementState::BackLeft | MovementState::BackRight
        )
    }
}

/// Directional request from an input source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionIntent {
    Forward,
    Back,
    TurnLeft,
    TurnRight,
    RotateLeft,
    RotateRight,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotateDirection {
    Left,
    Right,
}

impl From<RotateDirection> for MotionIntent {
    fn from(direction: RotateDirection) -> Self {
        match direction {
            RotateDirection::Left => MotionIntent::RotateLeft,
            RotateDirection::Right => MotionIntent::RotateRight,
        }
    }
}

/// A motor command and the state it leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub outputs: [MotorOutput; 2],
    pub next: MovementState,
}

/// Output pairs for each movement, derived from the motor configs
struct Drive<'a> {
    motors: &'a [MotorConfig; 2],
}

impl Drive<'_> {
    fn full(&self, i: usize, reverse: bool) -> MotorOutput {
        let m = &self.motors[i];
        MotorOutput::new(m.max_speed, Self::polarity(m, reverse))
    }

    fn half(&self, i: usize, reverse: bool) -> MotorOutput {
        let m = &self.motors[i];
        MotorOutput::new(m.max_speed / 2, Self::polarity(m, reverse))
    }

    fn polarity(m: &MotorConfig, reverse: bool) -> u8 {
        if reverse {
            m.reverse_direction()
        } else {
            m.direction
        }
    }

    fn step(&self, next: MovementState) -> Step {
        let outputs = match next {
            MovementState::Stopped => [MotorOutput::stopped(), MotorOutput::stopped()],
            MovementState::Forward => [self.full(0, false), self.full(1, false)],
            MovementState::Back => [self.full(0, true), self.full(1, true)],
            MovementState::ForwardLeft => [self.half(0, false), self.full(1, false)],
            MovementState::ForwardRight => [self.full(0, false), self.half(1, false)],
            MovementState::BackLeft => [self.half(0, true), self.full(1, true)],
            MovementState::BackRight => [self.full(0, true), self.half(1, true)],
            MovementState::RotateLeft => [self.half(0, true), self.half(1, false)],
            MovementState::RotateRight => [self.half(0, false), self.half(1, true)],
        };
        Step { outputs, next }
    }
}

fn go_forward(current: MovementState) -> Option<MovementState> {
    if current.is_backward() {
        Some(MovementState::Stopped)
    } else if current == MovementState::Forward {
        None
    } else {
        Some(MovementState::Forward)
    }
}

fn go_back(current: MovementState) -> Option<MovementState> {
    if current.is_forward() {
        Some(MovementState::Stopped)
    } else if current == MovementState::Back {
        None
    } else {
        Some(MovementState::Back)
    }
}

/// Target state for `intent` with the handbrake released; `None` keeps the current movement
fn target(current: MovementState, intent: MotionIntent) -> Option<MovementState> {
    use MovementState::*;

    match intent {
        MotionIntent::Stop => Some(Stopped),
        MotionIntent::Forward => go_forward(current),
        MotionIntent::Back => go_back(current),
        MotionIntent::TurnLeft => match current {
            Forward => Some(ForwardLeft),
            Back => Some(BackLeft),
            ForwardLeft | BackLeft => None,
            ForwardRight => go_forward(current),
            BackRight => go_back(current),
            Stopped | RotateLeft | RotateRight => Some(RotateLeft),
        },
        MotionIntent::TurnRight => match current {
            Forward => Some(ForwardRight),
            Back => Some(BackRight),
            ForwardRight | BackRight => None,
            ForwardLeft => go_forward(current),
            BackLeft => go_back(current),
            Stopped | RotateLeft | RotateRight => Some(RotateRight),
        },
        // Spinning in place reverses one motor, so a travelling vehicle brakes first
        MotionIntent::RotateLeft | MotionIntent::RotateRight
            if current.is_forward() || current.is_backward() =>
        {
            Some(Stopped)
        }
        MotionIntent::RotateLeft => Some(RotateLeft),
        MotionIntent::RotateRight => Some(RotateRight),
    }
}

/// Decide the motor command for `intent`. An engaged handbrake turns every intent into a stop.
pub fn plan(
    current: MovementState,
    handbrake: bool,
    intent: MotionIntent,
    motors: &[MotorConfig; 2],
) -> Option<Step> {
    let drive = Drive { motors };
    if handbrake {
        return Some(drive.step(MovementState::Stopped));
    }
    target(current, intent).map(|next| drive.step(next))
}

#[cfg(test)]
mod tests {
    use super::MovementState::*;
    use super::*;

    const INTENTS: [MotionIntent; 7] = [
        MotionIntent::Forward,
        MotionIntent::Back,
        MotionIntent::TurnLeft,
        MotionIntent::TurnRight,
        MotionIntent::RotateLeft,
        MotionIntent::RotateRight,
        MotionIntent::Stop,
    ];

    fn motors(max1: u32, dir1: u8, max2: u32, dir2: u8) -> [MotorConfig; 2] {
        [
            MotorConfig {
                max_speed: max1,
                direction: dir1,
                ..Default::default()
            },
            MotorConfig {
                max_speed: max2,
                direction: dir2,
                ..Default::default()
            },
        ]
    }

    fn out(speed: u32, direction: u8) -> MotorOutput {
        MotorOutput::new(speed, direction)
    }

    #[test]
    fn test_handbrake_stops_every_state_and_intent() {
        let cfg = motors(100, 0, 100, 1);
        for state in MovementState::ALL {
            for intent in INTENTS {
                let step = plan(state, true, intent, &cfg).expect("handbrake always issues a stop");
                assert_eq!(step.next, Stopped);
                assert_eq!(step.outputs, [out(0, 0), out(0, 0)]);
            }
        }
    }

    #[test]
    fn test_from_stopped() {
        let cfg = motors(100, 0, 80, 1);
        let forward = plan(Stopped, false, MotionIntent::Forward, &cfg).unwrap();
        assert_eq!(forward.next, Forward);
        assert_eq!(forward.outputs, [out(100, 0), out(80, 1)]);

        let back = plan(Stopped, false, MotionIntent::Back, &cfg).unwrap();
        assert_eq!(back.next, Back);
        assert_eq!(back.outputs, [out(100, 1), out(80, 0)]);

        let left = plan(Stopped, false, MotionIntent::TurnLeft, &cfg).unwrap();
        assert_eq!(left.next, RotateLeft);
        assert_eq!(left.outputs, [out(50, 1), out(40, 1)]);

        let right = plan(Stopped, false, MotionIntent::TurnRight, &cfg).unwrap();
        assert_eq!(right.next, RotateRight);
        assert_eq!(right.outputs, [out(50, 0), out(40, 0)]);
    }

    #[test]
    fn test_half_speed_floors() {
        let cfg = motors(101, 0, 7, 0);
        let step = plan(Forward, false, MotionIntent::TurnLeft, &cfg).unwrap();
        assert_eq!(step.outputs, [out(50, 0), out(7, 0)]);
        let step = plan(Forward, false, MotionIntent::TurnRight, &cfg).unwrap();
        assert_eq!(step.outputs, [out(101, 0), out(3, 0)]);
    }

    #[test]
    fn test_turns_while_moving() {
        let cfg = motors(100, 0, 100, 0);
        let step = plan(Forward, false, MotionIntent::TurnLeft, &cfg).unwrap();
        assert_eq!((step.next, step.outputs), (ForwardLeft, [out(50, 0), out(100, 0)]));

        let step = plan(Forward, false, MotionIntent::TurnRight, &cfg).unwrap();
        assert_eq!((step.next, step.outputs), (ForwardRight, [out(100, 0), out(50, 0)]));

        let step = plan(Back, false, MotionIntent::TurnLeft, &cfg).unwrap();
        assert_eq!((step.next, step.outputs), (BackLeft, [out(50, 1), out(100, 1)]));

        let step = plan(Back, false, MotionIntent::TurnRight, &cfg).unwrap();
        assert_eq!((step.next, step.outputs), (BackRight, [out(100, 1), out(50, 1)]));
    }

    #[test]
    fn test_reversal_brakes_first() {
        let cfg = motors(100, 0, 100, 0);
        for state in [Forward, ForwardLeft, ForwardRight] {
            assert_eq!(plan(state, false, MotionIntent::Back, &cfg).unwrap().next, Stopped);
        }
        for state in [Back, BackLeft, BackRight] {
            assert_eq!(plan(state, false, MotionIntent::Forward, &cfg).unwrap().next, Stopped);
        }
        // No single step flips polarity at speed
        for state in MovementState::ALL {
            for intent in INTENTS {
                if let Some(step) = plan(state, false, intent, &cfg) {
                    let flips = (state.is_forward() && step.next.is_backward())
                        || (state.is_backward() && step.next.is_forward());
                    assert!(!flips, "{:?} --{:?}--> {:?}", state, intent, step.next);
                }
            }
        }
    }

    #[test]
    fn test_repeat_is_noop() {
        let cfg = motors(100, 0, 100, 0);
        assert_eq!(plan(Forward, false, MotionIntent::Forward, &cfg), None);
        assert_eq!(plan(Back, false, MotionIntent::Back, &cfg), None);
    }

    #[test]
    fn test_maintain_and_straighten() {
        let cfg = motors(100, 0, 100, 0);
        // Same-side turn keeps the curve
        assert_eq!(plan(ForwardLeft, false, MotionIntent::TurnLeft, &cfg), None);
        assert_eq!(plan(BackLeft, false, MotionIntent::TurnLeft, &cfg), None);
        assert_eq!(plan(ForwardRight, false, MotionIntent::TurnRight, &cfg), None);
        assert_eq!(plan(BackRight, false, MotionIntent::TurnRight, &cfg), None);

        // Opposite turn straightens out
        assert_eq!(plan(ForwardLeft, false, MotionIntent::TurnRight, &cfg).unwrap().next, Forward);
        assert_eq!(plan(ForwardRight, false, MotionIntent::TurnLeft, &cfg).unwrap().next, Forward);
        assert_eq!(plan(BackLeft, false, MotionIntent::TurnRight, &cfg).unwrap().next, Back);
        assert_eq!(plan(BackRight, false, MotionIntent::TurnLeft, &cfg).unwrap().next, Back);

        // Same-direction travel from a curve straightens too
        assert_eq!(plan(ForwardLeft, false, MotionIntent::Forward, &cfg).unwrap().next, Forward);
        assert_eq!(plan(BackRight, false, MotionIntent::Back, &cfg).unwrap().next, Back);
    }

    #[test]
    fn test_rotation() {
        let cfg = motors(100, 0, 100, 0);
        // Turns re-issue rotation in place
        let step = plan(RotateLeft, false, MotionIntent::TurnLeft, &cfg).unwrap();
        assert_eq!((step.next, step.outputs), (RotateLeft, [out(50, 1), out(50, 0)]));
        assert_eq!(plan(RotateLeft, false, MotionIntent::TurnRight, &cfg).unwrap().next, RotateRight);
        assert_eq!(plan(RotateRight, false, MotionIntent::TurnLeft, &cfg).unwrap().next, RotateLeft);

        // Forward/back leave rotation directly
        assert_eq!(plan(RotateLeft, false, MotionIntent::Forward, &cfg).unwrap().next, Forward);
        assert_eq!(plan(RotateRight, false, MotionIntent::Back, &cfg).unwrap().next, Back);

        // Explicit rotation only from rest or rotation
        assert_eq!(plan(Stopped, false, MotionIntent::RotateRight, &cfg).unwrap().next, RotateRight);
        assert_eq!(plan(RotateRight, false, MotionIntent::RotateLeft, &cfg).unwrap().next, RotateLeft);
        assert_eq!(plan(Forward, false, MotionIntent::RotateLeft, &cfg).unwrap().next, Stopped);
        assert_eq!(plan(BackLeft, false, MotionIntent::RotateRight, &cfg).unwrap().next, Stopped);
    }

    #[test]
    fn test_stop_always_commands() {
        let cfg = motors(100, 1, 100, 1);
        for state in MovementState::ALL {
            let step = plan(state, false, MotionIntent::Stop, &cfg).unwrap();
            assert_eq!(step.next, Stopped);
            assert_eq!(step.outputs, [out(0, 0), out(0, 0)]);
        }
    }

    #[test]
    fn test_rotate_direction_into_intent() {
        assert_eq!(MotionIntent::from(RotateDirection::Left), MotionIntent::RotateLeft);
        assert_eq!(MotionIntent::from(RotateDirection::Right), MotionIntent::RotateRight);
    }
}
