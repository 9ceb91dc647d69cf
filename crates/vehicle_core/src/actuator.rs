use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{GpioBackend, PinMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// NaN has no position in the range and lands on `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseRange {
    pub min: u32,
    pub max: u32,
}

impl PulseRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

pub const GIMBAL_ANGLE_RANGE: ValueRange = ValueRange::new(-90.0, 90.0);
pub const GIMBAL_PULSE_RANGE: PulseRange = PulseRange::new(1000, 2000);
pub const STEERING_ANGLE_RANGE: ValueRange = ValueRange::new(0.0, 180.0);
pub const STEERING_PULSE_RANGE: PulseRange = PulseRange::new(500, 2500);

/// Servo frame period used for every output, in microseconds (50 Hz).
pub const SERVO_PERIOD_US: u64 = 20_000;

/// Maps a logical quantity onto a pulse width in microseconds.
///
/// The value is clamped into `value_range` before interpolation, so the result never leaves
/// `pulse_range`.
pub fn to_pulse_width(value: f64, value_range: ValueRange, pulse_range: PulseRange) -> u32 {
    let value = value_range.clamp(value);
    let span = value_range.max - value_range.min;
    if span <= 0.0 {
        return pulse_range.min;
    }

    let fraction = (value - value_range.min) / span;
    let pulse_span = f64::from(pulse_range.max) - f64::from(pulse_range.min);
    let pulse = f64::from(pulse_range.min) + fraction * pulse_span;
    pulse.round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Steering,
    Esc,
    GimbalYaw,
    GimbalPitch,
    GimbalMode,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Steering => "steering",
            Channel::Esc => "esc",
            Channel::GimbalYaw => "gimbal_yaw",
            Channel::GimbalPitch => "gimbal_pitch",
            Channel::GimbalMode => "gimbal_mode",
        }
    }
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("gpio backend was not compiled in; rebuild with the `gpio-hardware` feature")]
    BackendUnavailable,
    #[error("failed to open gpio {pin} for {channel}: {message}")]
    Open {
        channel: &'static str,
        pin: u8,
        message: String,
    },
    #[error("failed to write {pulse_width_us}us to {channel}: {message}")]
    Write {
        channel: &'static str,
        pulse_width_us: u32,
        message: String,
    },
}

/// A single pulse-width driven line (servo or ESC input).
pub trait PulseOutput: Send {
    fn write_pulse(&mut self, pulse_width_us: u32) -> Result<(), ActuatorError>;
}

/// Output that only traces its writes. Used off-vehicle.
pub struct LogOutput {
    channel: Channel,
}

impl LogOutput {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

impl PulseOutput for LogOutput {
    fn write_pulse(&mut self, pulse_width_us: u32) -> Result<(), ActuatorError> {
        debug!(
            channel = self.channel.as_str(),
            pulse_width_us, "pulse write"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseWrite {
    pub at: Instant,
    pub pulse_width_us: u32,
}

/// Output that keeps every write. Clones share the same record.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    writes: Arc<Mutex<Vec<PulseWrite>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<PulseWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pulses(&self) -> Vec<u32> {
        self.writes().iter().map(|w| w.pulse_width_us).collect()
    }

    pub fn last(&self) -> Option<u32> {
        self.writes().last().map(|w| w.pulse_width_us)
    }

    pub fn clear(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PulseOutput for RecordingOutput {
    fn write_pulse(&mut self, pulse_width_us: u32) -> Result<(), ActuatorError> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PulseWrite {
                at: Instant::now(),
                pulse_width_us,
            });
        Ok(())
    }
}

#[cfg(feature = "gpio-hardware")]
pub use gpio::GpioOutput;

#[cfg(feature = "gpio-hardware")]
mod gpio {
    use std::time::Duration;

    use rppal::gpio::{Gpio, OutputPin};

    use super::{ActuatorError, Channel, PulseOutput, SERVO_PERIOD_US};

    /// Software PWM on a Raspberry Pi GPIO line.
    pub struct GpioOutput {
        channel: Channel,
        pin: OutputPin,
    }

    impl GpioOutput {
        pub fn open(gpio: &Gpio, channel: Channel, pin: u8) -> Result<Self, ActuatorError> {
            let pin = gpio
                .get(pin)
                .map_err(|err| ActuatorError::Open {
                    channel: channel.as_str(),
                    pin,
                    message: err.to_string(),
                })?
                .into_output();
            Ok(Self { channel, pin })
        }
    }

    impl PulseOutput for GpioOutput {
        fn write_pulse(&mut self, pulse_width_us: u32) -> Result<(), ActuatorError> {
            self.pin
                .set_pwm(
                    Duration::from_micros(SERVO_PERIOD_US),
                    Duration::from_micros(u64::from(pulse_width_us)),
                )
                .map_err(|err| ActuatorError::Write {
                    channel: self.channel.as_str(),
                    pulse_width_us,
                    message: err.to_string(),
                })
        }
    }
}

/// Every output line the vehicle drives, opened once at startup.
pub struct ActuatorSet {
    pub steering: Box<dyn PulseOutput>,
    pub esc: Box<dyn PulseOutput>,
    pub gimbal_yaw: Box<dyn PulseOutput>,
    pub gimbal_pitch: Box<dyn PulseOutput>,
    pub gimbal_mode: Box<dyn PulseOutput>,
}

impl ActuatorSet {
    pub fn open(backend: GpioBackend, pins: &PinMap) -> Result<Self, ActuatorError> {
        match backend {
            GpioBackend::Log => Ok(Self {
                steering: Box::new(LogOutput::new(Channel::Steering)),
                esc: Box::new(LogOutput::new(Channel::Esc)),
                gimbal_yaw: Box::new(LogOutput::new(Channel::GimbalYaw)),
                gimbal_pitch: Box::new(LogOutput::new(Channel::GimbalPitch)),
                gimbal_mode: Box::new(LogOutput::new(Channel::GimbalMode)),
            }),
            GpioBackend::Gpio => Self::open_gpio(pins),
        }
    }

    #[cfg(feature = "gpio-hardware")]
    fn open_gpio(pins: &PinMap) -> Result<Self, ActuatorError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|err| ActuatorError::Open {
            channel: "gpio",
            pin: 0,
            message: err.to_string(),
        })?;
        Ok(Self {
            steering: Box::new(GpioOutput::open(&gpio, Channel::Steering, pins.steering)?),
            esc: Box::new(GpioOutput::open(&gpio, Channel::Esc, pins.esc)?),
            gimbal_yaw: Box::new(GpioOutput::open(&gpio, Channel::GimbalYaw, pins.gimbal_yaw)?),
            gimbal_pitch: Box::new(GpioOutput::open(
                &gpio,
                Channel::GimbalPitch,
                pins.gimbal_pitch,
            )?),
            gimbal_mode: Box::new(GpioOutput::open(
                &gpio,
                Channel::GimbalMode,
                pins.gimbal_mode,
            )?),
        })
    }

    #[cfg(not(feature = "gpio-hardware"))]
    fn open_gpio(_pins: &PinMap) -> Result<Self, ActuatorError> {
        Err(ActuatorError::BackendUnavailable)
    }
}

#[cfg(test)]
#[path = "tests/actuator_tests.rs"]
mod tests;
