use serde_json::{Map, Value};
use shared::{domain::Direction, protocol::Envelope};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    actuator::{ActuatorError, ActuatorSet},
    config::Settings,
    drive::{DriveController, CENTER_TURN_ANGLE_DEGREES},
    gimbal::GimbalController,
    video::VideoSupervisor,
};

/// Every action the vehicle understands, with its parameters already typed.
///
/// Numeric parameters are `None` when absent or not numeric; the dispatcher fills in the
/// defaults from current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Init {
        car_speed: Option<f64>,
        degree_of_turns: Option<f64>,
    },
    StopCar,
    Breaking,
    ResetTurns {
        degree_of_turns: Option<f64>,
    },
    ChangeDegreeOfTurns {
        degree_of_turns: Option<f64>,
    },
    TurnTo {
        degrees: Option<f64>,
    },
    Move {
        direction: Direction,
        car_speed: Option<f64>,
    },
    SetEscToNeutralPosition,
    StartCamera,
    StopCamera,
    CameraGimbalTurnTo {
        degrees: Option<f64>,
    },
    CameraGimbalSetPitchAngle {
        degrees: Option<f64>,
    },
    ResetCameraGimbal,
    Unknown(String),
}

impl Action {
    pub fn decode(action: &str, params: &Map<String, Value>) -> Self {
        match action {
            "init" => Action::Init {
                car_speed: numeric_param(params, "carSpeed"),
                degree_of_turns: numeric_param(params, "degreeOfTurns"),
            },
            "stop-car" => Action::StopCar,
            "breaking" => Action::Breaking,
            "reset-turns" => Action::ResetTurns {
                degree_of_turns: numeric_param(params, "degreeOfTurns"),
            },
            "change-degree-of-turns" => Action::ChangeDegreeOfTurns {
                degree_of_turns: numeric_param(params, "degreeOfTurns"),
            },
            "turn-to" => Action::TurnTo {
                degrees: numeric_param(params, "degrees"),
            },
            "forward" => Action::Move {
                direction: Direction::Forward,
                car_speed: numeric_param(params, "carSpeed"),
            },
            "backward" => Action::Move {
                direction: Direction::Backward,
                car_speed: numeric_param(params, "carSpeed"),
            },
            "set-esc-to-neutral-position" => Action::SetEscToNeutralPosition,
            "start-camera" | "run-mediamtx" => Action::StartCamera,
            "stop-camera" | "stop-mediamtx" => Action::StopCamera,
            "camera-gimbal-turn-to" => Action::CameraGimbalTurnTo {
                degrees: numeric_param(params, "degrees"),
            },
            "camera-gimbal-set-pitch-angle" => Action::CameraGimbalSetPitchAngle {
                degrees: numeric_param(params, "degrees"),
            },
            "reset-camera-gimbal" => Action::ResetCameraGimbal,
            other => Action::Unknown(other.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Init { .. } => "init",
            Action::StopCar => "stop-car",
            Action::Breaking => "breaking",
            Action::ResetTurns { .. } => "reset-turns",
            Action::ChangeDegreeOfTurns { .. } => "change-degree-of-turns",
            Action::TurnTo { .. } => "turn-to",
            Action::Move { direction, .. } => direction.as_str(),
            Action::SetEscToNeutralPosition => "set-esc-to-neutral-position",
            Action::StartCamera => "start-camera",
            Action::StopCamera => "stop-camera",
            Action::CameraGimbalTurnTo { .. } => "camera-gimbal-turn-to",
            Action::CameraGimbalSetPitchAngle { .. } => "camera-gimbal-set-pitch-angle",
            Action::ResetCameraGimbal => "reset-camera-gimbal",
            Action::Unknown(name) => name,
        }
    }
}

/// Reads a base-10 number from a JSON number or a numeric string.
///
/// Strings are read up to the first character that cannot continue a number, so `"70px"`
/// gives 70. Anything else, including non-finite results, is `None`.
pub fn numeric_param(params: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match params.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => leading_number(text),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut has_digits = end > digits_start;
    if bytes.get(end) == Some(&b'.') {
        let fraction_start = end + 1;
        let mut fraction_end = fraction_start;
        while bytes.get(fraction_end).is_some_and(u8::is_ascii_digit) {
            fraction_end += 1;
        }
        if fraction_end > fraction_start {
            has_digits = true;
            end = fraction_end;
        }
    }
    if !has_digits {
        return None;
    }
    text[..end].parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied(Action),
    UnknownAction(String),
    MissingAction,
    Malformed,
}

/// Routes decoded actions to the controller that owns the affected actuator.
pub struct Dispatcher {
    drive: DriveController,
    gimbal: GimbalController,
    video: VideoSupervisor,
}

impl Dispatcher {
    pub fn new(drive: DriveController, gimbal: GimbalController, video: VideoSupervisor) -> Self {
        Self {
            drive,
            gimbal,
            video,
        }
    }

    /// Opens the configured outputs and builds every controller. Output failures are fatal.
    pub fn from_settings(settings: &Settings) -> Result<Self, ActuatorError> {
        let outputs = ActuatorSet::open(settings.gpio_backend, &settings.pins)?;
        let drive = DriveController::new(outputs.steering, outputs.esc, settings.esc);
        let gimbal =
            GimbalController::new(outputs.gimbal_yaw, outputs.gimbal_pitch, outputs.gimbal_mode);
        let video = VideoSupervisor::new(
            settings.mediamtx_bin_path.clone(),
            settings.mediamtx_config_path.clone(),
        );
        Ok(Self::new(drive, gimbal, video))
    }

    pub fn drive(&self) -> &DriveController {
        &self.drive
    }

    pub fn gimbal(&self) -> &GimbalController {
        &self.gimbal
    }

    pub fn video(&self) -> &VideoSupervisor {
        &self.video
    }

    pub fn handle_frame(&mut self, raw: &[u8]) -> DispatchOutcome {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return DispatchOutcome::Malformed;
            }
        };
        self.handle_envelope(&envelope)
    }

    pub fn handle_envelope(&mut self, envelope: &Envelope) -> DispatchOutcome {
        let Some(name) = envelope.action() else {
            return DispatchOutcome::MissingAction;
        };
        let action = Action::decode(name, &envelope.data);
        self.apply(action)
    }

    pub fn apply(&mut self, action: Action) -> DispatchOutcome {
        debug!(action = action.name(), "dispatching");
        match &action {
            Action::Init {
                car_speed,
                degree_of_turns,
            } => {
                let state = self.drive.state();
                let car_speed = car_speed.unwrap_or(f64::from(state.car_speed));
                let degrees = degree_of_turns.unwrap_or(state.turn_angle_degrees);
                self.drive.init(car_speed, degrees);
                self.gimbal.init();
            }
            Action::StopCar => self.drive.stop_car(),
            Action::Breaking => self.drive.breaking(),
            Action::ResetTurns { degree_of_turns } => {
                self.drive
                    .turn(degree_of_turns.unwrap_or(CENTER_TURN_ANGLE_DEGREES));
            }
            Action::ChangeDegreeOfTurns { degree_of_turns } => {
                let degrees = degree_of_turns.unwrap_or(self.drive.state().turn_angle_degrees);
                self.drive.turn(degrees);
            }
            Action::TurnTo { degrees } => {
                let degrees = degrees.unwrap_or(self.drive.state().turn_angle_degrees);
                self.drive.turn(degrees);
            }
            Action::Move {
                direction,
                car_speed,
            } => {
                let speed = car_speed.unwrap_or(f64::from(self.drive.state().car_speed));
                self.drive.move_car(*direction, speed);
            }
            Action::SetEscToNeutralPosition => self.drive.set_esc_to_neutral_position(),
            Action::StartCamera => {
                if let Err(err) = self.video.run() {
                    error!(%err, "failed to start streaming process");
                }
            }
            Action::StopCamera => {
                if let Err(err) = self.video.stop() {
                    error!(%err, "failed to stop streaming process");
                }
            }
            Action::CameraGimbalTurnTo { degrees } => {
                self.gimbal.set_yaw_angle(degrees.unwrap_or(0.0));
            }
            Action::CameraGimbalSetPitchAngle { degrees } => {
                self.gimbal.set_pitch_angle(degrees.unwrap_or(0.0));
            }
            Action::ResetCameraGimbal => self.gimbal.reset(),
            Action::Unknown(name) => {
                debug!(action = %name, "ignoring unknown action");
                return DispatchOutcome::UnknownAction(name.clone());
            }
        }
        DispatchOutcome::Applied(action)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.drive.next_deadline()
    }

    pub fn on_deadline(&mut self) {
        self.drive.on_deadline();
    }

    /// Fail-safe for a lost link: stop the car and the streaming process.
    pub fn shutdown(&mut self) {
        info!("fail-safe stop of car and streaming process");
        self.drive.stop_car();
        if let Err(err) = self.video.stop() {
            error!(%err, "failed to stop streaming process");
        }
    }

    /// Drives any pending stop or braking sequence to completion.
    pub async fn settle(&mut self) {
        while let Some(deadline) = self.drive.next_deadline() {
            tokio::time::sleep_until(deadline).await;
            self.drive.on_deadline();
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
