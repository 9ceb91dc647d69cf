use tracing::warn;

use crate::actuator::{to_pulse_width, PulseOutput, GIMBAL_ANGLE_RANGE, GIMBAL_PULSE_RANGE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GimbalState {
    pub yaw_angle_degrees: f64,
    pub pitch_angle_degrees: f64,
}

/// Two independent camera axes plus the board's mode line.
pub struct GimbalController {
    yaw: Box<dyn PulseOutput>,
    pitch: Box<dyn PulseOutput>,
    mode: Box<dyn PulseOutput>,
    state: GimbalState,
}

impl GimbalController {
    pub fn new(
        yaw: Box<dyn PulseOutput>,
        pitch: Box<dyn PulseOutput>,
        mode: Box<dyn PulseOutput>,
    ) -> Self {
        Self {
            yaw,
            pitch,
            mode,
            state: GimbalState {
                yaw_angle_degrees: 0.0,
                pitch_angle_degrees: 0.0,
            },
        }
    }

    pub fn state(&self) -> GimbalState {
        self.state
    }

    /// Drives the gimbal board's mode line to the top of the pulse range.
    pub fn init(&mut self) {
        if let Err(err) = self.mode.write_pulse(GIMBAL_PULSE_RANGE.max) {
            warn!(%err, "gimbal mode write failed");
        }
    }

    pub fn set_yaw_angle(&mut self, angle: f64) {
        let angle = GIMBAL_ANGLE_RANGE.clamp(angle);
        let pulse = to_pulse_width(angle, GIMBAL_ANGLE_RANGE, GIMBAL_PULSE_RANGE);
        if let Err(err) = self.yaw.write_pulse(pulse) {
            warn!(%err, "gimbal yaw write failed");
        }
        self.state.yaw_angle_degrees = angle;
    }

    pub fn set_pitch_angle(&mut self, angle: f64) {
        let angle = GIMBAL_ANGLE_RANGE.clamp(angle);
        let pulse = to_pulse_width(angle, GIMBAL_ANGLE_RANGE, GIMBAL_PULSE_RANGE);
        if let Err(err) = self.pitch.write_pulse(pulse) {
            warn!(%err, "gimbal pitch write failed");
        }
        self.state.pitch_angle_degrees = angle;
    }

    pub fn reset(&mut self) {
        self.set_yaw_angle(0.0);
        self.set_pitch_angle(0.0);
    }
}

#[cfg(test)]
#[path = "tests/gimbal_tests.rs"]
mod tests;
