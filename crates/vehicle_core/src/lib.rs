//! On-vehicle control core: actuator outputs, the drive and gimbal controllers, the streaming
//! process supervisor, the action dispatcher, and the relay link that feeds it.

pub mod actuator;
pub mod config;
pub mod dispatch;
pub mod drive;
pub mod gimbal;
pub mod link;
pub mod video;

pub use config::{load_settings, Settings};
pub use dispatch::{Action, DispatchOutcome, Dispatcher};
pub use link::{run_link, LinkError, SessionEnd};
