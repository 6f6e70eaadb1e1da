//! WebDriver-style JSON bodies for the automation server's session API.

use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;

/// Server-assigned session identifier.
pub type SessionId = String;

/// `POST /session` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionRequest {
	pub capabilities: CapabilityRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequest {
	pub always_match: Capabilities,
}

impl NewSessionRequest {
	pub fn new(always_match: Capabilities) -> Self {
		Self {
			capabilities: CapabilityRequest { always_match },
		}
	}
}

/// `POST /session` success body: `{ "value": { "sessionId": ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionResponse {
	pub value: NewSessionValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionValue {
	pub session_id: SessionId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub capabilities: Option<Capabilities>,
}

/// Error body returned by WebDriver endpoints: `{ "value": { "error", "message" } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverErrorBody {
	pub value: WebDriverErrorValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverErrorValue {
	pub error: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stacktrace: Option<String>,
}
