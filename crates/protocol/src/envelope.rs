use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id carried by every envelope.
pub type MessageId = i64;

/// The unit of exchange on the tester/app channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
	/// Type tag, e.g. `"invoke"` or `"invokeResult"`.
	#[serde(rename = "type")]
	pub kind: String,
	/// Action parameters. Absent params deserialize as an empty object.
	#[serde(default = "empty_params")]
	pub params: Value,
	/// Correlation id. Events pushed by the app may omit it.
	#[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
	pub message_id: Option<MessageId>,
}

fn empty_params() -> Value {
	Value::Object(Default::default())
}

impl ActionEnvelope {
	/// Creates an envelope without a correlation id.
	pub fn new(kind: impl Into<String>, params: Value) -> Self {
		let params = if params.is_null() { empty_params() } else { params };
		Self {
			kind: kind.into(),
			params,
			message_id: None,
		}
	}

	/// Sets the correlation id.
	pub fn with_message_id(mut self, id: MessageId) -> Self {
		self.message_id = Some(id);
		self
	}

	/// Deserializes `params` into a typed payload.
	pub fn params_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
		serde_json::from_value(self.params.clone())
	}

	/// Returns `true` if the type tag equals `kind`.
	pub fn is(&self, kind: &str) -> bool {
		self.kind == kind
	}
}
