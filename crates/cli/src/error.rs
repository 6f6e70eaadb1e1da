use std::path::PathBuf;

use msb_protocol::ControlError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// The daemon answered with an error envelope; it has already been printed.
	#[error("{}: {}", .0.code, .0.message)]
	Daemon(ControlError),

	#[error("daemon is not running at {0}; start it with `msb daemon`")]
	NotRunning(PathBuf),

	#[error("daemon already running at {0}")]
	AlreadyRunning(PathBuf),

	#[error(transparent)]
	Broker(#[from] msb::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Whether the failure details are already on stdout.
	pub fn is_output_already_printed(&self) -> bool {
		matches!(self, CliError::Daemon(_))
	}
}
