//! Typed parameter payloads for the actions that have a fixed shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role announced by the test runner in the login handshake.
pub const TESTER_ROLE: &str = "tester";

/// Parameters of the `login` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginParams {
	pub session_id: String,
	pub role: String,
}

impl LoginParams {
	pub fn tester(session_id: impl Into<String>) -> Self {
		Self {
			session_id: session_id.into(),
			role: TESTER_ROLE.to_string(),
		}
	}
}

/// Parameters of the `cleanup` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupParams {
	/// Asks the app-side runner to exit once cleanup is done.
	pub stop_runner: bool,
}

/// Whether the app currently has work in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdleState {
	Idle,
	Busy,
}

/// An idling resource that is currently keeping the app busy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusyResource {
	pub name: String,
	#[serde(default)]
	pub info: Value,
}

impl BusyResource {
	/// Human readable description, if the app provided one.
	pub fn pretty(&self) -> Option<&str> {
		self.info.get("prettyPrint").and_then(Value::as_str)
	}
}

/// Payload of `currentStatusResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStatus {
	pub state: IdleState,
	#[serde(default)]
	pub resources: Vec<BusyResource>,
}

impl CurrentStatus {
	pub fn is_idle(&self) -> bool {
		self.state == IdleState::Idle
	}

	/// One line per busy resource, for logs.
	pub fn describe(&self) -> String {
		if self.resources.is_empty() {
			return format!("{:?}", self.state).to_lowercase();
		}
		self.resources
			.iter()
			.map(|r| match r.pretty() {
				Some(pretty) => format!("{}: {}", r.name, pretty),
				None => r.name.clone(),
			})
			.collect::<Vec<_>>()
			.join("; ")
	}
}

/// Payload of `testFailed` and `error` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetails {
	#[serde(default)]
	pub details: String,
}

/// Payload of the `AppWillTerminateWithError` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashDetails {
	pub error_details: String,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn busy_status_parses_resources() {
		let params = json!({
			"state": "busy",
			"resources": [
				{"name": "App State", "info": {"prettyPrint": "Waiting for network requests to finish."}},
				{"name": "Dispatch Queue", "info": {"queue": "main"}}
			]
		});
		let status: CurrentStatus = serde_json::from_value(params).unwrap();

		assert!(!status.is_idle());
		assert_eq!(status.resources.len(), 2);
		assert_eq!(
			status.describe(),
			"App State: Waiting for network requests to finish.; Dispatch Queue"
		);
	}

	#[test]
	fn idle_status_without_resources() {
		let status: CurrentStatus = serde_json::from_value(json!({"state": "idle"})).unwrap();

		assert!(status.is_idle());
		assert!(status.resources.is_empty());
		assert_eq!(status.describe(), "idle");
	}

	#[test]
	fn login_params_use_camel_case() {
		let value = serde_json::to_value(LoginParams::tester("abc")).unwrap();
		assert_eq!(value, json!({"sessionId": "abc", "role": "tester"}));
	}

	#[test]
	fn unknown_idle_state_is_rejected() {
		let result = serde_json::from_value::<CurrentStatus>(json!({"state": "sleeping"}));
		assert!(result.is_err());
	}
}
