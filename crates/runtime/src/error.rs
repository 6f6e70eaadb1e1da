//! Error types for the broker runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by server processes, the session HTTP client, and device bridges.
#[derive(Debug, Error)]
pub enum Error {
	/// Appium binary was not found in any search location.
	#[error("Appium server not found. Install with: npm install -g appium, or set MSB_APPIUM_PATH")]
	ServerNotFound,

	/// Failed to spawn the automation server process.
	#[error("Failed to launch automation server: {0}")]
	LaunchFailed(String),

	/// Server process exited before or while being polled.
	#[error("Automation server on port {port} exited: {status}")]
	ServerExited { port: u16, status: String },

	/// Transport-level HTTP failure (connect refused, timeout, reset).
	#[error("HTTP error: {0}")]
	Http(String),

	/// WebDriver error reported by the server. Displays the server's message verbatim.
	#[error("{message}")]
	Remote {
		/// HTTP status code of the response
		status: u16,
		/// WebDriver error name (e.g., "session not created", "invalid session id")
		error: String,
		message: String,
	},

	/// Session id unknown to the server.
	#[error("Session not found: {0}")]
	SessionNotFound(String),

	/// Response body did not match the expected shape.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Device bridge tool is missing or not runnable.
	#[error("Device bridge unavailable: {0}")]
	BridgeUnavailable(String),

	/// Device bridge tool ran but reported failure.
	#[error("{command} failed: {message}")]
	BridgeFailed { command: String, message: String },

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true when the server reported the session as unknown.
	pub fn is_session_not_found(&self) -> bool {
		match self {
			Error::SessionNotFound(_) => true,
			Error::Remote { status, error, .. } => *status == 404 || error == "invalid session id",
			_ => false,
		}
	}

	/// Returns true for failures that never reached the server.
	pub fn is_transport(&self) -> bool {
		matches!(self, Error::Http(_))
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		Error::Http(err.to_string())
	}
}
