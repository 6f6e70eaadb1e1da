use serde::{Deserialize, Serialize};

/// Lifecycle of one device as seen by the broker.
///
/// ```text
/// Idle -> ServerPending -> ServerReady -> SessionPending -> SessionReady
///                                              ^                 |
///                                              +-- session died -+
/// ```
///
/// Any state may return to `Idle` on stop, failure, or cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
	#[default]
	Idle,
	ServerPending,
	ServerReady,
	SessionPending,
	SessionReady,
}

impl DeviceState {
	pub fn can_transition_to(self, next: DeviceState) -> bool {
		use DeviceState::*;
		matches!(
			(self, next),
			(_, Idle)
				| (Idle, ServerPending)
				| (ServerPending, ServerReady)
				| (ServerReady, SessionPending | ServerPending)
				| (SessionPending, SessionReady | ServerReady)
				| (SessionReady, SessionPending | ServerReady | ServerPending)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::DeviceState::*;

	#[test]
	fn happy_path_is_allowed() {
		assert!(Idle.can_transition_to(ServerPending));
		assert!(ServerPending.can_transition_to(ServerReady));
		assert!(ServerReady.can_transition_to(SessionPending));
		assert!(SessionPending.can_transition_to(SessionReady));
	}

	#[test]
	fn dead_session_returns_to_pending() {
		assert!(SessionReady.can_transition_to(SessionPending));
	}

	#[test]
	fn skipping_the_server_is_rejected() {
		assert!(!Idle.can_transition_to(SessionPending));
		assert!(!Idle.can_transition_to(SessionReady));
		assert!(!ServerPending.can_transition_to(SessionReady));
	}

	#[test]
	fn every_state_can_reset() {
		for state in [Idle, ServerPending, ServerReady, SessionPending, SessionReady] {
			assert!(state.can_transition_to(Idle));
		}
	}
}
