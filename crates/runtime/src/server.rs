//! Automation server process management.
//!
//! Spawns one Appium process per device, bound to a caller-chosen local port,
//! and forwards its stdout/stderr into `tracing` under target `msb.server`.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use msb_protocol::DeviceId;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::locate::ServerCommand;

/// Starts automation server processes.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
	/// Spawns a server for `device` listening on `port`.
	///
	/// Returns as soon as the process exists; readiness is the caller's concern.
	async fn launch(&self, device: &DeviceId, port: u16) -> Result<Box<dyn ServerProcess>>;
}

/// A spawned automation server.
#[async_trait]
pub trait ServerProcess: Send + Sync + fmt::Debug {
	/// OS process id, when known.
	fn pid(&self) -> Option<u32>;

	/// Returns the exit status description if the process has exited.
	fn exit_status(&mut self) -> Result<Option<String>>;

	/// Terminates the process and reaps it.
	async fn kill(&mut self) -> Result<()>;
}

/// Launches Appium with `--address`, `--port` and `--base-path`.
#[derive(Debug, Clone)]
pub struct AppiumLauncher {
	command: ServerCommand,
	host: String,
	base_path: String,
	extra_args: Vec<String>,
}

impl AppiumLauncher {
	pub fn new(command: ServerCommand, host: impl Into<String>, base_path: impl Into<String>) -> Self {
		Self {
			command,
			host: host.into(),
			base_path: base_path.into(),
			extra_args: Vec::new(),
		}
	}

	/// Appends arguments after the bind flags (e.g. `--relaxed-security`).
	pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
		self.extra_args = args;
		self
	}

	/// Full argument list passed to the program for `port`.
	pub fn args_for(&self, port: u16) -> Vec<String> {
		let mut args: Vec<String> = self.command.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
		args.extend([
			"--address".to_string(),
			self.host.clone(),
			"--port".to_string(),
			port.to_string(),
			"--base-path".to_string(),
			self.base_path.clone(),
		]);
		args.extend(self.extra_args.iter().cloned());
		args
	}
}

#[async_trait]
impl ServerLauncher for AppiumLauncher {
	async fn launch(&self, device: &DeviceId, port: u16) -> Result<Box<dyn ServerProcess>> {
		info!(target = "msb.server", device = %device, port, program = %self.command.program.display(), "starting appium");

		let mut child = Command::new(&self.command.program)
			.args(self.args_for(port))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {}", self.command.program.display(), e)))?;

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(forward_output(stdout, device.clone(), port, false));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(forward_output(stderr, device.clone(), port, true));
		}

		Ok(Box::new(AppiumServer { child, port }))
	}
}

async fn forward_output<R>(stream: R, device: DeviceId, port: u16, is_stderr: bool)
where
	R: AsyncRead + Unpin,
{
	let mut lines = BufReader::new(stream).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) if is_stderr => warn!(target = "msb.server", device = %device, port, "{line}"),
			Ok(Some(line)) => debug!(target = "msb.server", device = %device, port, "{line}"),
			Ok(None) => break,
			Err(e) => {
				debug!(target = "msb.server", device = %device, port, error = %e, "output stream closed");
				break;
			}
		}
	}
}

/// Running Appium child process.
#[derive(Debug)]
pub struct AppiumServer {
	child: Child,
	port: u16,
}

#[async_trait]
impl ServerProcess for AppiumServer {
	fn pid(&self) -> Option<u32> {
		self.child.id()
	}

	fn exit_status(&mut self) -> Result<Option<String>> {
		Ok(self.child.try_wait()?.map(|status| status.to_string()))
	}

	async fn kill(&mut self) -> Result<()> {
		if self.child.try_wait()?.is_some() {
			return Ok(());
		}

		self.child
			.kill()
			.await
			.map_err(|e| Error::LaunchFailed(format!("Failed to kill server on port {}: {}", self.port, e)))?;

		let _ = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	#[test]
	fn args_bind_host_port_and_base_path() {
		let launcher = AppiumLauncher::new(ServerCommand::from_path("/usr/bin/appium"), "127.0.0.1", "/wd/hub");
		assert_eq!(
			launcher.args_for(4723),
			vec!["--address", "127.0.0.1", "--port", "4723", "--base-path", "/wd/hub"]
		);
	}

	#[test]
	fn node_entry_point_precedes_bind_flags() {
		let launcher = AppiumLauncher::new(ServerCommand::from_path("/srv/node_modules/appium/index.js"), "127.0.0.1", "/wd/hub")
			.with_extra_args(vec!["--relaxed-security".into()]);
		let args = launcher.args_for(4725);
		assert_eq!(args.first().map(String::as_str), Some("/srv/node_modules/appium/index.js"));
		assert_eq!(args.last().map(String::as_str), Some("--relaxed-security"));
	}

	#[tokio::test]
	async fn missing_program_fails_to_launch() {
		let command = ServerCommand {
			program: PathBuf::from("/nonexistent/msb-appium-test"),
			args: Vec::new(),
		};
		let launcher = AppiumLauncher::new(command, "127.0.0.1", "/wd/hub");
		let err = launcher.launch(&"emulator-5554".into(), 4723).await.unwrap_err();
		assert!(matches!(err, Error::LaunchFailed(_)), "unexpected error: {err:?}");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn spawned_process_can_be_killed() {
		// `sh -c` takes the appium flags as positional parameters and ignores them.
		let command = ServerCommand {
			program: PathBuf::from("sh"),
			args: vec!["-c".into(), "sleep 30".into()],
		};
		let launcher = AppiumLauncher::new(command, "127.0.0.1", "/wd/hub");
		let mut process = launcher.launch(&"emulator-5554".into(), 4799).await.unwrap();
		assert!(process.pid().is_some());
		assert!(process.exit_status().unwrap().is_none());

		process.kill().await.unwrap();
		assert!(process.exit_status().unwrap().is_some());
	}
}
