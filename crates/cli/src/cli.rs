use std::path::PathBuf;

use clap::{Parser, Subcommand};
use msb_protocol::{ControlRequest, DeviceId};

use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "msb")]
#[command(about = "Mobile session broker - one Appium server and session per device")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Broker config file (defaults to <config dir>/msb/config.json)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
	/// Run the broker daemon in the foreground
	Daemon,

	/// List connected devices
	Devices,

	/// Start the automation server for a device
	StartServer { device: DeviceId },

	/// Close the device's session and stop its server
	StopServer { device: DeviceId },

	/// Show the device's server port, state, and pid
	ServerStatus { device: DeviceId },

	/// Get a live session for a device, creating one if needed
	#[command(alias = "get-session")]
	Session { device: DeviceId },

	/// Close the device's session, keeping its server
	CloseSession { device: DeviceId },

	/// Probe the device's session without recreating it
	Health { device: DeviceId },

	/// Close every session and stop every server
	Cleanup,

	/// Check that the daemon is running
	Ping,

	/// Clean up and stop the daemon
	Shutdown,
}

impl Commands {
	/// The control request this command sends, `None` for `daemon`.
	pub fn to_request(&self) -> Option<ControlRequest> {
		let request = match self {
			Commands::Daemon => return None,
			Commands::Devices => ControlRequest::GetDevices,
			Commands::StartServer { device } => ControlRequest::StartServer { device_id: device.clone() },
			Commands::StopServer { device } => ControlRequest::StopServer { device_id: device.clone() },
			Commands::ServerStatus { device } => ControlRequest::ServerStatus { device_id: device.clone() },
			Commands::Session { device } => ControlRequest::GetSession { device_id: device.clone() },
			Commands::CloseSession { device } => ControlRequest::CloseSession { device_id: device.clone() },
			Commands::Health { device } => ControlRequest::SessionHealth { device_id: device.clone() },
			Commands::Cleanup => ControlRequest::Cleanup,
			Commands::Ping => ControlRequest::Ping,
			Commands::Shutdown => ControlRequest::Shutdown,
		};
		Some(request)
	}
}

#[cfg(test)]
mod tests;
