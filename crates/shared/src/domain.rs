use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(ConnectionId);

/// Endpoint name the on-vehicle process registers under.
pub const VEHICLE_ENDPOINT: &str = "rc-car-server";

/// Endpoint name the driver station registers under.
pub const DRIVER_ENDPOINT: &str = "rc-car-client";

/// Request header carrying the endpoint name on connect.
pub const SOURCE_HEADER: &str = "x-source";

/// Query parameter carrying the endpoint name when the header is absent.
pub const SOURCE_QUERY: &str = "source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Neutral,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
