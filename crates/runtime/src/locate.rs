//! Appium executable lookup.
//!
//! Search order:
//! 1. `MSB_APPIUM_PATH` environment variable (runtime override)
//! 2. Path from broker configuration
//! 3. Local npm installation under `./node_modules`
//! 4. `appium` on `PATH`
//!
//! A `.js` entry point is run through `node`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

pub const APPIUM_PATH_ENV: &str = "MSB_APPIUM_PATH";

/// Program plus leading arguments used to start the automation server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
	pub program: PathBuf,
	pub args: Vec<OsString>,
}

impl ServerCommand {
	/// Wraps `path`, running JavaScript entry points through `node`.
	pub fn from_path(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		if path.extension().is_some_and(|ext| ext == "js") {
			Self {
				program: PathBuf::from("node"),
				args: vec![path.into_os_string()],
			}
		} else {
			Self { program: path, args: Vec::new() }
		}
	}
}

/// Locates the Appium executable.
///
/// # Errors
///
/// Returns [`Error::ServerNotFound`] if no candidate exists.
pub fn locate_server(configured: Option<&Path>) -> Result<ServerCommand> {
	if let Ok(path) = std::env::var(APPIUM_PATH_ENV) {
		let path = PathBuf::from(path);
		if path.exists() {
			debug!(target = "msb.server", source = APPIUM_PATH_ENV, path = %path.display(), "using appium");
			return Ok(ServerCommand::from_path(path));
		}
	}

	if let Some(path) = configured {
		if path.exists() {
			debug!(target = "msb.server", source = "config", path = %path.display(), "using appium");
			return Ok(ServerCommand::from_path(path));
		}
		if let Ok(resolved) = which::which(path) {
			return Ok(ServerCommand::from_path(resolved));
		}
	}

	if let Ok(cwd) = std::env::current_dir() {
		if let Some(path) = local_candidates(&cwd).into_iter().find(|p| p.exists()) {
			debug!(target = "msb.server", source = "npm local", path = %path.display(), "using appium");
			return Ok(ServerCommand::from_path(path));
		}
	}

	match which::which("appium") {
		Ok(path) => {
			debug!(target = "msb.server", source = "PATH", path = %path.display(), "using appium");
			Ok(ServerCommand::from_path(path))
		}
		Err(_) => Err(Error::ServerNotFound),
	}
}

fn local_candidates(root: &Path) -> Vec<PathBuf> {
	let modules = root.join("node_modules");
	vec![
		modules.join(".bin").join("appium"),
		modules.join(".bin").join("appium.cmd"),
		modules.join("appium").join("index.js"),
		modules.join("appium").join("bin").join("appium.js"),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn js_entry_point_runs_through_node() {
		let cmd = ServerCommand::from_path("/opt/app/node_modules/appium/index.js");
		assert_eq!(cmd.program, PathBuf::from("node"));
		assert_eq!(cmd.args, vec![OsString::from("/opt/app/node_modules/appium/index.js")]);
	}

	#[test]
	fn binary_runs_directly() {
		let cmd = ServerCommand::from_path("/usr/local/bin/appium");
		assert_eq!(cmd.program, PathBuf::from("/usr/local/bin/appium"));
		assert!(cmd.args.is_empty());
	}

	#[test]
	fn local_bin_is_preferred_over_package_entry() {
		let tmp = tempfile::tempdir().unwrap();
		let bin = tmp.path().join("node_modules").join(".bin");
		std::fs::create_dir_all(&bin).unwrap();
		std::fs::write(bin.join("appium"), "").unwrap();
		let entry = tmp.path().join("node_modules").join("appium");
		std::fs::create_dir_all(&entry).unwrap();
		std::fs::write(entry.join("index.js"), "").unwrap();

		let found = local_candidates(tmp.path()).into_iter().find(|p| p.exists()).unwrap();
		assert_eq!(found, bin.join("appium"));
	}
}
