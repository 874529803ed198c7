//! Error types for the tester/app channel.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the instrumented app.
#[derive(Debug, Error)]
pub enum Error {
	/// The channel could not be opened or the login handshake was refused.
	#[error("Failed to connect to the app: {0}")]
	ConnectionFailed(String),

	/// An action was issued before `connect()` succeeded.
	#[error("Client is not connected")]
	NotConnected,

	/// Transport-level failure (socket or framing).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol misuse that is not tied to a single request.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// The app answered with a type the sent action does not accept.
	#[error("Unexpected response type '{actual}' (expected one of: {}), params: {params}", expected.join(", "))]
	ProtocolMismatch {
		/// Types the action accepts.
		expected: Vec<String>,
		/// Type that actually arrived.
		actual: String,
		/// Payload of the unexpected response.
		params: Value,
	},

	/// The channel closed while the request was pending.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// The app reported an assertion failure (`testFailed`).
	#[error("Test failed: {details}")]
	TestFailed { details: String },

	/// The app reported an execution error (`error`), e.g. a crash inside the invocation.
	#[error("Remote execution error: {details}")]
	RemoteExecution { details: String },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns `true` for failures that are a normal test outcome.
	pub fn is_test_failure(&self) -> bool {
		matches!(self, Error::TestFailed { .. })
	}

	/// Returns `true` for failures of the harness or the app rather than the test.
	pub fn is_infrastructure(&self) -> bool {
		!self.is_test_failure()
	}

	/// Returns `true` if the channel is gone.
	pub fn is_channel_closed(&self) -> bool {
		matches!(self, Error::ChannelClosed | Error::NotConnected)
	}
}
