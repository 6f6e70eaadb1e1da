//! HTTP client for the automation server's WebDriver session API.

use std::time::Duration;

use async_trait::async_trait;
use msb_protocol::{Capabilities, NewSessionRequest, NewSessionResponse, SessionId, WebDriverErrorBody};
use reqwest::{Response, StatusCode};
use tracing::debug;

use crate::error::{Error, Result};

/// Session lifecycle calls against the server listening on a local port.
#[async_trait]
pub trait SessionApi: Send + Sync {
	/// `GET /status`; `Ok` once the server has finished booting.
	async fn status(&self, port: u16) -> Result<()>;

	/// `POST /session` with `capabilities` as `alwaysMatch`.
	async fn create_session(&self, port: u16, capabilities: Capabilities, timeout: Duration) -> Result<SessionId>;

	/// `GET /session/<id>`; `Ok` when the server still knows the session.
	async fn probe_session(&self, port: u16, session_id: &str) -> Result<()>;

	/// `DELETE /session/<id>`.
	async fn delete_session(&self, port: u16, session_id: &str) -> Result<()>;
}

/// [`SessionApi`] over HTTP via `reqwest`.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
	http: reqwest::Client,
	host: String,
	base_path: String,
	request_timeout: Duration,
}

impl WebDriverClient {
	/// Creates a client for servers bound to `host` under `base_path`.
	///
	/// `request_timeout` bounds status, probe, and delete calls; session
	/// creation takes its own timeout per call.
	pub fn new(host: impl Into<String>, base_path: impl Into<String>, request_timeout: Duration) -> Result<Self> {
		let http = reqwest::Client::builder()
			.build()
			.map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;
		Ok(Self {
			http,
			host: host.into(),
			base_path: normalize_base_path(&base_path.into()),
			request_timeout,
		})
	}

	/// Absolute URL for `path` on the server at `port`.
	pub fn url(&self, port: u16, path: &str) -> String {
		format!("http://{}:{}{}/{}", self.host, port, self.base_path, path.trim_start_matches('/'))
	}
}

#[async_trait]
impl SessionApi for WebDriverClient {
	async fn status(&self, port: u16) -> Result<()> {
		let response = self.http.get(self.url(port, "status")).timeout(self.request_timeout).send().await?;
		if response.status().is_success() {
			Ok(())
		} else {
			Err(remote_error(response).await)
		}
	}

	async fn create_session(&self, port: u16, capabilities: Capabilities, timeout: Duration) -> Result<SessionId> {
		debug!(target = "msb.registry", port, capabilities = ?capabilities, "creating session");
		let body = NewSessionRequest::new(capabilities);

		let response = self.http.post(self.url(port, "session")).json(&body).timeout(timeout).send().await?;
		if !response.status().is_success() {
			return Err(remote_error(response).await);
		}

		let text = response.text().await?;
		let parsed: NewSessionResponse =
			serde_json::from_str(&text).map_err(|e| Error::ProtocolError(format!("Unexpected session response {text:?}: {e}")))?;
		Ok(parsed.value.session_id)
	}

	async fn probe_session(&self, port: u16, session_id: &str) -> Result<()> {
		let response = self
			.http
			.get(self.url(port, &format!("session/{session_id}")))
			.timeout(self.request_timeout)
			.send()
			.await?;

		match response.status() {
			status if status.is_success() => Ok(()),
			StatusCode::NOT_FOUND => Err(Error::SessionNotFound(session_id.to_string())),
			_ => Err(remote_error(response).await),
		}
	}

	async fn delete_session(&self, port: u16, session_id: &str) -> Result<()> {
		let response = self
			.http
			.delete(self.url(port, &format!("session/{session_id}")))
			.timeout(self.request_timeout)
			.send()
			.await?;

		if response.status().is_success() {
			Ok(())
		} else {
			Err(remote_error(response).await)
		}
	}
}

/// Turns a non-2xx response into [`Error::Remote`], keeping the server's message.
async fn remote_error(response: Response) -> Error {
	let status = response.status();
	let text = match response.text().await {
		Ok(text) => text,
		Err(e) => return Error::Http(e.to_string()),
	};

	match serde_json::from_str::<WebDriverErrorBody>(&text) {
		Ok(body) => Error::Remote {
			status: status.as_u16(),
			error: body.value.error,
			message: body.value.message,
		},
		Err(_) => Error::Remote {
			status: status.as_u16(),
			error: status.canonical_reason().unwrap_or("unknown error").to_ascii_lowercase(),
			message: if text.trim().is_empty() { status.to_string() } else { text },
		},
	}
}

fn normalize_base_path(path: &str) -> String {
	let trimmed = path.trim_matches('/');
	if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn url_joins_base_path_once() {
		let client = WebDriverClient::new("127.0.0.1", "/wd/hub/", Duration::from_secs(1)).unwrap();
		assert_eq!(client.url(4723, "status"), "http://127.0.0.1:4723/wd/hub/status");
		assert_eq!(client.url(4724, "/session/abc"), "http://127.0.0.1:4724/wd/hub/session/abc");
	}

	#[test]
	fn empty_base_path_targets_root() {
		let client = WebDriverClient::new("127.0.0.1", "/", Duration::from_secs(1)).unwrap();
		assert_eq!(client.url(4723, "status"), "http://127.0.0.1:4723/status");
	}
}
