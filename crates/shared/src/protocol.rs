use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;

pub const CONNECTION_ESTABLISHED: &str = "Connection Established";

/// Unit exchanged over every relay connection.
///
/// Only `to` and `data.action` carry meaning for routing and dispatch; every other key
/// travels as opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Envelope {
    #[cfg(test)]
    pub fn new(to: impl Into<String>, action: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("action".into(), Value::String(action.into()));
        Self {
            to: Some(to.into()),
            data,
        }
    }

    #[cfg(test)]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Decodes a raw frame. A `data` member that is not an object is read as empty, which
    /// leaves the envelope without an action.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(mut object) = value else {
            return Err(FrameError::NotAnObject);
        };
        let to = object
            .get("to")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let data = match object.remove("data") {
            Some(Value::Object(data)) => data,
            _ => Map::new(),
        };
        Ok(Self { to, data })
    }

    pub fn action(&self) -> Option<&str> {
        self.data.get("action").and_then(Value::as_str)
    }
}

/// The part of a frame the relay looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHeader {
    pub to: Option<String>,
}

impl RoutingHeader {
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(object) = value else {
            return Err(FrameError::NotAnObject);
        };
        let to = object
            .get("to")
            .and_then(Value::as_str)
            .filter(|to| !to.is_empty())
            .map(str::to_owned);
        Ok(Self { to })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAck {
    pub message: String,
}

impl ConnectionAck {
    pub fn established() -> Self {
        Self {
            message: CONNECTION_ESTABLISHED.into(),
        }
    }
}

/// Vehicle to driver status. Field names follow what driver UIs read at the top level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPush {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "carStarted")]
    pub car_started: bool,
    #[serde(rename = "cameraURL", default, skip_serializing_if = "Option::is_none")]
    pub camera_url: Option<String>,
}

impl StatusPush {
    pub fn started(to: impl Into<String>, camera_url: Option<String>) -> Self {
        Self {
            to: Some(to.into()),
            car_started: true,
            camera_url,
        }
    }

    pub fn stopped(to: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            car_started: false,
            camera_url: None,
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
