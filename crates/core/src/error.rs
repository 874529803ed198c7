//! Error types for the harness.

use thiserror::Error;

use crate::artifacts::ArtifactState;
use crate::device::DeviceState;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by devices, the registry, artifacts and the session.
#[derive(Debug, Error)]
pub enum Error {
	/// The device did not report boot completion within the polling budget.
	#[error("Device {device_id} did not finish booting after {attempts} attempts")]
	BootTimeout { device_id: String, attempts: u32 },

	/// The device registry could not be read, written or locked.
	#[error("Device registry error: {0}")]
	Registry(String),

	/// The registry lock is held by another process. Retried internally.
	#[error("Device registry lock is held: {0}")]
	RegistryContention(String),

	/// A device operation was requested in a state that does not allow it.
	#[error("Device cannot go from {from:?} to {to:?}")]
	InvalidDeviceTransition { from: DeviceState, to: DeviceState },

	/// An artifact lifecycle call was made in the wrong order.
	#[error("Artifact '{artifact}' cannot {operation} while {state:?}")]
	InvalidArtifactTransition {
		artifact: String,
		operation: &'static str,
		state: ArtifactState,
	},

	/// Capturing, pulling or removing an artifact file failed.
	#[error("Artifact '{artifact}' failed to {operation}: {message}")]
	ArtifactIo {
		artifact: String,
		operation: &'static str,
		message: String,
	},

	/// The test runner handed over a malformed test summary.
	#[error("Invalid test summary: {0}")]
	InvalidTestSummary(String),

	/// An external tool exited unsuccessfully.
	#[error("Command `{command}` failed (exit code {code:?}): {stderr}")]
	Command {
		command: String,
		code: Option<i32>,
		stderr: String,
	},

	/// The backend has no implementation of the requested operation.
	#[error("{operation} is not supported by the {backend} backend")]
	Unsupported {
		backend: &'static str,
		operation: &'static str,
	},

	/// The run configuration is missing or inconsistent.
	#[error("Configuration error: {0}")]
	Config(String),

	/// Error from the app channel.
	#[error(transparent)]
	Runtime(#[from] mdrive_runtime::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns `true` if the failure is the test's own assertion failing.
	pub fn is_test_failure(&self) -> bool {
		matches!(self, Error::Runtime(e) if e.is_test_failure())
	}

	/// Returns `true` for failures of the harness, the device or the app.
	pub fn is_infrastructure(&self) -> bool {
		!self.is_test_failure()
	}
}
