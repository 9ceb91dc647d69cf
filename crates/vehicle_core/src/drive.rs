use std::time::Duration;

use shared::domain::Direction;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    actuator::{to_pulse_width, PulseOutput, STEERING_ANGLE_RANGE, STEERING_PULSE_RANGE},
    config::EscCalibration,
};

pub const DEFAULT_CAR_SPEED: u32 = 50;
pub const DEFAULT_TURN_ANGLE_DEGREES: f64 = 87.0;
pub const CENTER_TURN_ANGLE_DEGREES: f64 = 90.0;
pub const MAX_CAR_SPEED: u32 = 100;

/// Delay between the two neutral writes of a braking sequence.
pub const BRAKE_REPEAT_DELAY: Duration = Duration::from_millis(100);
/// Delay before the neutral write of a stop sequence.
pub const STOP_NEUTRAL_DELAY: Duration = Duration::from_millis(200);
/// Delay between the neutral write and the backward kick of a stop sequence.
pub const STOP_KICK_DELAY: Duration = Duration::from_millis(200);
pub const STOP_KICK_SPEED: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DriveState {
    pub turn_angle_degrees: f64,
    pub car_speed: u32,
    pub engine_running: bool,
    pub direction: Direction,
    pub esc_pulse_width: u32,
    pub steering_pulse_width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopStage {
    Neutral,
    Kick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    Idle,
    Braking { due: Instant },
    Stopping { stage: StopStage, due: Instant },
}

impl Sequence {
    fn due(&self) -> Option<Instant> {
        match self {
            Sequence::Idle => None,
            Sequence::Braking { due } | Sequence::Stopping { due, .. } => Some(*due),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Sequence::Idle => "idle",
            Sequence::Braking { .. } => "braking",
            Sequence::Stopping { .. } => "stop",
        }
    }
}

/// Pulse width commanding `speed` percent of travel in `direction`.
///
/// Speed is clamped to `1..=100` first; `Neutral` always yields the neutral pulse.
pub fn esc_pulse_width(calibration: &EscCalibration, direction: Direction, speed: f64) -> u32 {
    let speed = if speed.is_nan() {
        1.0
    } else {
        speed.clamp(1.0, f64::from(MAX_CAR_SPEED))
    };
    let neutral = f64::from(calibration.neutral_pulse_width);
    let fraction = speed / f64::from(MAX_CAR_SPEED);

    let pulse = match direction {
        Direction::Forward => {
            neutral + fraction * (f64::from(calibration.max_pulse_width) - neutral)
        }
        Direction::Backward => {
            neutral - fraction * (neutral - f64::from(calibration.min_pulse_width))
        }
        Direction::Neutral => neutral,
    };

    (pulse.round() as u32).clamp(calibration.min_pulse_width, calibration.max_pulse_width)
}

/// Owner of the steering servo and the drive ESC.
///
/// Braking and stopping are multi-step sequences. Their later steps are not timers of their
/// own: the owner polls [`DriveController::next_deadline`] and calls
/// [`DriveController::on_deadline`] once it passes. Any ESC command issued in between replaces
/// the pending sequence.
pub struct DriveController {
    steering: Box<dyn PulseOutput>,
    esc: Box<dyn PulseOutput>,
    calibration: EscCalibration,
    state: DriveState,
    sequence: Sequence,
}

impl DriveController {
    pub fn new(
        steering: Box<dyn PulseOutput>,
        esc: Box<dyn PulseOutput>,
        calibration: EscCalibration,
    ) -> Self {
        Self {
            steering,
            esc,
            calibration,
            state: DriveState {
                turn_angle_degrees: DEFAULT_TURN_ANGLE_DEGREES,
                car_speed: DEFAULT_CAR_SPEED,
                engine_running: false,
                direction: Direction::Neutral,
                esc_pulse_width: calibration.neutral_pulse_width,
                steering_pulse_width: to_pulse_width(
                    DEFAULT_TURN_ANGLE_DEGREES,
                    STEERING_ANGLE_RANGE,
                    STEERING_PULSE_RANGE,
                ),
            },
            sequence: Sequence::Idle,
        }
    }

    pub fn state(&self) -> &DriveState {
        &self.state
    }

    pub fn init(&mut self, car_speed: f64, turn_angle_degrees: f64) {
        self.cancel_sequence();
        self.state.car_speed = clamp_car_speed(car_speed);
        self.turn(turn_angle_degrees);
        self.write_esc(self.calibration.neutral_pulse_width);
        self.state.direction = Direction::Neutral;
        self.state.engine_running = false;
        debug!(
            car_speed = self.state.car_speed,
            turn_angle_degrees = self.state.turn_angle_degrees,
            "drive initialised"
        );
    }

    /// `direction` must be forward or backward; neutral is routed to the neutral write.
    pub fn move_car(&mut self, direction: Direction, speed: f64) {
        if direction == Direction::Neutral {
            self.set_esc_to_neutral_position();
            return;
        }

        self.cancel_sequence();
        let pulse = esc_pulse_width(&self.calibration, direction, speed);
        self.write_esc(pulse);
        self.state.direction = direction;
        self.state.engine_running = true;
    }

    pub fn turn(&mut self, degrees: f64) {
        let degrees = STEERING_ANGLE_RANGE.clamp(degrees);
        let pulse = to_pulse_width(degrees, STEERING_ANGLE_RANGE, STEERING_PULSE_RANGE);
        if let Err(err) = self.steering.write_pulse(pulse) {
            warn!(%err, "steering write failed");
        }
        self.state.turn_angle_degrees = degrees;
        self.state.steering_pulse_width = pulse;
    }

    pub fn set_esc_to_neutral_position(&mut self) {
        self.cancel_sequence();
        self.write_esc(self.calibration.neutral_pulse_width);
        self.state.direction = Direction::Neutral;
    }

    /// Neutral now, and neutral again after [`BRAKE_REPEAT_DELAY`] to release ESC brake latching.
    pub fn breaking(&mut self) {
        self.cancel_sequence();
        self.write_esc(self.calibration.neutral_pulse_width);
        self.state.direction = Direction::Neutral;
        self.state.engine_running = false;
        self.sequence = Sequence::Braking {
            due: Instant::now() + BRAKE_REPEAT_DELAY,
        };
    }

    /// Neutral after [`STOP_NEUTRAL_DELAY`], then a backward kick after [`STOP_KICK_DELAY`].
    pub fn stop_car(&mut self) {
        self.cancel_sequence();
        self.sequence = Sequence::Stopping {
            stage: StopStage::Neutral,
            due: Instant::now() + STOP_NEUTRAL_DELAY,
        };
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.sequence.due()
    }

    pub fn is_sequence_pending(&self) -> bool {
        self.sequence != Sequence::Idle
    }

    /// Runs the pending sequence step if its deadline has passed.
    pub fn on_deadline(&mut self) {
        let now = Instant::now();
        match self.sequence {
            Sequence::Idle => {}
            Sequence::Braking { due } if due <= now => {
                self.sequence = Sequence::Idle;
                self.write_esc(self.calibration.neutral_pulse_width);
            }
            Sequence::Stopping {
                stage: StopStage::Neutral,
                due,
            } if due <= now => {
                self.write_esc(self.calibration.neutral_pulse_width);
                self.state.direction = Direction::Neutral;
                self.sequence = Sequence::Stopping {
                    stage: StopStage::Kick,
                    due: now + STOP_KICK_DELAY,
                };
            }
            Sequence::Stopping {
                stage: StopStage::Kick,
                due,
            } if due <= now => {
                self.sequence = Sequence::Idle;
                // Seen after neutral, the ESC reads the backward pulse as a brake.
                let pulse = esc_pulse_width(&self.calibration, Direction::Backward, STOP_KICK_SPEED);
                self.write_esc(pulse);
                self.state.engine_running = false;
                debug!("stop sequence complete");
            }
            Sequence::Braking { .. } | Sequence::Stopping { .. } => {}
        }
    }

    fn cancel_sequence(&mut self) {
        if self.sequence != Sequence::Idle {
            debug!(sequence = self.sequence.name(), "pending sequence cancelled");
            self.sequence = Sequence::Idle;
        }
    }

    fn write_esc(&mut self, pulse_width_us: u32) {
        if let Err(err) = self.esc.write_pulse(pulse_width_us) {
            warn!(%err, "esc write failed");
        }
        self.state.esc_pulse_width = pulse_width_us;
    }
}

fn clamp_car_speed(car_speed: f64) -> u32 {
    if car_speed.is_nan() {
        return DEFAULT_CAR_SPEED;
    }
    car_speed.clamp(0.0, f64::from(MAX_CAR_SPEED)).trunc() as u32
}

#[cfg(test)]
#[path = "tests/drive_tests.rs"]
mod tests;
