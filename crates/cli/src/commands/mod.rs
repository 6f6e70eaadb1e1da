//! Subcommand dispatch: `daemon` runs the broker, everything else is a
//! one-shot request to a running daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use msb::{BrokerConfig, DeviceSessionBroker};
use msb_protocol::{ControlRequest, ControlResponse};
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::daemon::{self, Daemon};
use crate::error::{CliError, Result};

/// `<config dir>/msb/config.json`, e.g. `~/.config/msb/config.json` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("msb").join("config.json"))
}

pub fn load_config(path: Option<&Path>) -> Result<BrokerConfig> {
	let default_path = default_config_path();
	Ok(BrokerConfig::load_or_default(path, default_path.as_deref())?)
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command.to_request() {
		None => run_daemon(cli.config.as_deref()).await,
		Some(request) => send(request).await,
	}
}

async fn run_daemon(config_path: Option<&Path>) -> Result<()> {
	if daemon::is_running().await {
		return Err(CliError::AlreadyRunning(daemon::daemon_address()));
	}

	let config = load_config(config_path)?;
	info!(target = "msb.daemon", start_port = config.start_port, base_path = %config.base_path, "starting broker");
	let broker = Arc::new(DeviceSessionBroker::from_config(config)?);

	let daemon = Daemon::bind(broker).await?;
	daemon.run().await?;
	Ok(())
}

async fn send(request: ControlRequest) -> Result<()> {
	let Some(response) = daemon::send_request(&request).await? else {
		return Err(CliError::NotRunning(daemon::daemon_address()));
	};

	print_response(&response)?;
	match response {
		ControlResponse::Error { error } => Err(CliError::Daemon(error)),
		_ => Ok(()),
	}
}

fn print_response(response: &ControlResponse) -> Result<()> {
	let json = serde_json::to_string_pretty(response).map_err(anyhow::Error::from)?;
	println!("{json}");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn explicit_config_overrides_default() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("msb.json");
		std::fs::write(&path, r#"{ "start_port": 4800, "ios_discovery": true }"#).unwrap();

		let config = load_config(Some(&path)).unwrap();
		assert_eq!(config.start_port, 4800);
		assert!(config.ios_discovery);
	}

	#[test]
	fn unreadable_config_is_an_error() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("msb.json");
		std::fs::write(&path, "{ not json").unwrap();

		let err = load_config(Some(&path)).unwrap_err();
		assert!(matches!(err, CliError::Broker(msb::Error::Config(_))), "unexpected error: {err:?}");
	}

	#[test]
	fn default_config_lives_under_msb() {
		if let Some(path) = default_config_path() {
			assert!(path.ends_with("msb/config.json"));
		}
	}
}
