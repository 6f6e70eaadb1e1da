//! Broker runtime - automation server processes, session HTTP client, device bridges
//!
//! The low-level pieces the broker orchestrates:
//!
//! - **Server processes**: locating and launching Appium, one process per device
//! - **Session client**: WebDriver-style session create/probe/delete over HTTP
//! - **Device bridges**: `adb` and libimobiledevice discovery and housekeeping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │     msb      │  Broker, pool, registry, lock table
//! └──────┬───────┘
//!        │ ServerLauncher / SessionApi / DeviceBridge
//! ┌──────▼───────┐
//! │ msb-runtime  │  This crate
//! │  ┌────────┐  │
//! │  │ Server │  │  Appium process lifecycle
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Client │  │  WebDriver session HTTP
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Bridge │  │  adb / idevice_id
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! The broker depends only on the three traits, so tests substitute in-memory
//! implementations without spawning processes or opening sockets.

pub mod bridge;
pub mod client;
pub mod error;
pub mod locate;
pub mod server;

pub use bridge::{AdbBridge, DeviceBridge, HostBridge, IosBridge, parse_adb_devices};
pub use client::{SessionApi, WebDriverClient};
pub use error::{Error, Result};
pub use locate::{ServerCommand, locate_server};
pub use server::{AppiumLauncher, AppiumServer, ServerLauncher, ServerProcess};
