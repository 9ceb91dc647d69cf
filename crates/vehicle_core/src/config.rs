use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::{DRIVER_ENDPOINT, VEHICLE_ENDPOINT};

pub const DEFAULT_SETTINGS_FILE: &str = "vehicle.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    /// Trace writes instead of touching hardware.
    #[default]
    Log,
    Gpio,
}

impl FromStr for GpioBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(GpioBackend::Log),
            "gpio" => Ok(GpioBackend::Gpio),
            other => bail!("unknown gpio backend '{other}', expected 'log' or 'gpio'"),
        }
    }
}

/// BCM pin numbers of each output line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub steering: u8,
    pub esc: u8,
    pub gimbal_yaw: u8,
    pub gimbal_pitch: u8,
    pub gimbal_mode: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            steering: 17,
            esc: 23,
            gimbal_yaw: 24,
            gimbal_pitch: 22,
            gimbal_mode: 27,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EscCalibration {
    pub min_pulse_width: u32,
    pub neutral_pulse_width: u32,
    pub max_pulse_width: u32,
}

impl Default for EscCalibration {
    fn default() -> Self {
        Self {
            min_pulse_width: 1000,
            neutral_pulse_width: 1500,
            max_pulse_width: 2000,
        }
    }
}

impl EscCalibration {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.min_pulse_width < self.neutral_pulse_width
            && self.neutral_pulse_width < self.max_pulse_width)
        {
            bail!(
                "esc calibration must satisfy min < neutral < max (got {} / {} / {})",
                self.min_pulse_width,
                self.neutral_pulse_width,
                self.max_pulse_width
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the relay, e.g. `ws://192.168.1.20:8585`.
    pub relay_url: String,
    pub source_name: String,
    pub driver_endpoint: String,
    /// Advertised to the driver UI in the status push.
    pub camera_url: Option<String>,
    pub mediamtx_bin_path: Option<PathBuf>,
    pub mediamtx_config_path: Option<PathBuf>,
    pub reconnect_delay_ms: u64,
    pub gpio_backend: GpioBackend,
    pub pins: PinMap,
    pub esc: EscCalibration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8585".into(),
            source_name: VEHICLE_ENDPOINT.into(),
            driver_endpoint: DRIVER_ENDPOINT.into(),
            camera_url: None,
            mediamtx_bin_path: None,
            mediamtx_config_path: None,
            reconnect_delay_ms: 2_000,
            gpio_backend: GpioBackend::Log,
            pins: PinMap::default(),
            esc: EscCalibration::default(),
        }
    }
}

impl Settings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Defaults, then `path` if it exists, then the process environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.esc.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub(crate) fn apply_env_overrides(
    settings: &mut Settings,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = var("VEHICLE_RELAY_URL") {
        settings.relay_url = v;
    }
    if let Some(v) = var("APP__RELAY_URL") {
        settings.relay_url = v;
    }

    if let Some(v) = var("VEHICLE_SOURCE") {
        settings.source_name = v;
    }

    if let Some(v) = var("VEHICLE_CAMERA_URL") {
        settings.camera_url = Some(v);
    }

    if let Some(v) = var("MEDIAMTX_BIN_PATH") {
        settings.mediamtx_bin_path = Some(PathBuf::from(v));
    }
    if let Some(v) = var("MEDIAMTX_CONFIG_PATH") {
        settings.mediamtx_config_path = Some(PathBuf::from(v));
    }

    if let Some(v) = var("VEHICLE_GPIO_BACKEND") {
        settings.gpio_backend = v.parse()?;
    }

    if let Some(v) = var("VEHICLE_RECONNECT_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_delay_ms = parsed;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
