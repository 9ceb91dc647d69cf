use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "relay.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    /// Upper bound on a single inbound WebSocket message.
    pub max_message_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8585".into(),
            max_message_bytes: 1024 * 1024,
        }
    }
}

/// Defaults, then `path` if it exists, then the process environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
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

fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("RELAY_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = var("RELAY_MAX_MESSAGE_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_message_bytes = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
