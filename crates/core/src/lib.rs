//! msb: device session broker for mobile automation servers
//!
//! Owns one Appium server per device, serializes access to it, and hands out
//! live WebDriver sessions, recreating them when the server has dropped them.
//!
//! # Example
//!
//! ```ignore
//! use msb::{BrokerConfig, DeviceSessionBroker};
//!
//! #[tokio::main]
//! async fn main() -> msb::Result<()> {
//!     let broker = DeviceSessionBroker::from_config(BrokerConfig::default())?;
//!
//!     for device in broker.list_devices().await {
//!         let session_id = broker.get_or_create_session(&device.id).await?;
//!         println!("{} ({}): {}", device.name, device.id, session_id);
//!     }
//!
//!     let report = broker.cleanup().await;
//!     println!("closed {} sessions", report.sessions_closed);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Operations on different devices run fully in parallel. Operations on the
//! same device are mutually exclusive: the loser of a race gets
//! [`Error::Busy`] without waiting.
//!
//! # Testing
//!
//! The `fake` feature enables the `fake` module: in-memory launcher, session
//! API and bridge implementations so the broker can be exercised without
//! Appium or devices.

pub mod best_effort;
pub mod broker;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod lock;
pub mod pool;
pub mod registry;
pub mod state;

pub use best_effort::BestEffort;
pub use broker::DeviceSessionBroker;
pub use config::{BrokerConfig, PollConfig};
pub use error::{Error, Result};
pub use lock::{DeviceLease, DeviceLockTable};
pub use msb_protocol::{CleanupReport, DeviceId, DeviceInfo, Platform, ServerState, ServerStatus, SessionHealth, SessionId};
pub use pool::{ServerHandle, ServerPool};
pub use registry::{SessionRecord, SessionRegistry};
pub use state::DeviceState;
