//! Wire types shared by the broker runtime, core, and control surface.
//!
//! - [`device`] - device identifiers and discovery descriptors
//! - [`capabilities`] - per-platform session capability table
//! - [`webdriver`] - WebDriver-style session request/response bodies
//! - [`control`] - control-surface requests and responses

pub mod capabilities;
pub mod control;
pub mod device;
pub mod webdriver;

pub use capabilities::{Capabilities, capabilities_for};
pub use control::{
	CleanupFailure, CleanupReport, CleanupStage, ControlError, ControlRequest, ControlResponse, ServerState, ServerStatus, SessionHealth,
};
pub use device::{DeviceId, DeviceInfo, Platform};
pub use webdriver::{NewSessionRequest, NewSessionResponse, SessionId, WebDriverErrorBody};
