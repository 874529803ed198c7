//! Test artifacts: device logs, screenshots and screen recordings.
//!
//! # Layers
//!
//! - [`ArtifactHost`] - device-bound capture primitives, provided by the backend
//! - [`Recording`] - one capture (log, screenshot, video) built on a host
//! - [`Artifact`] - lifecycle guard around a recording; sequences
//!   `start`, `stop` and `save`/`discard` through completion signals
//! - [`ArtifactPlugin`] - decides when to capture and whether to keep it
//! - [`ArtifactsManager`] - fans test and device events out to the plugins

mod artifact;
mod manager;
mod paths;
mod plugins;
mod recordings;
mod summary;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use artifact::{Artifact, ArtifactState, Completion, CompletionHandle, Recording, StartArgs};
pub use manager::ArtifactsManager;
pub use paths::ArtifactPathBuilder;
pub use plugins::{ArtifactPlugin, PluginContext, TwoSnapshotsPerTestPlugin, WholeTestKind, WholeTestRecorderPlugin};
pub use recordings::{LogRecording, ScreenshotRecording, VideoRecording};
pub use summary::{TestStatus, TestSummary};

use crate::error::Result;
use crate::exec::BackgroundProcess;

/// Capture primitives of one device.
///
/// Paths are in the host's own namespace: on-device paths for adb, host
/// temporary files for simulators. [`ArtifactHost::pull`] moves a capture to
/// its final destination on the machine running the tests.
#[async_trait]
pub trait ArtifactHost: Send + Sync {
	/// A fresh, unused path for a capture with the given extension.
	fn temporary_path(&self, extension: &str) -> String;

	/// Starts streaming the device log into `path`, limited to `pid` if given.
	async fn start_log(&self, path: &str, pid: Option<u32>) -> Result<Box<dyn BackgroundProcess>>;

	/// Starts recording the screen into `path`.
	async fn start_video(&self, path: &str) -> Result<Box<dyn BackgroundProcess>>;

	/// Captures the screen into `path`.
	async fn take_screenshot(&self, path: &str) -> Result<()>;

	/// Size of the file at `path`, or `None` if it does not exist.
	async fn file_size(&self, path: &str) -> Result<Option<u64>>;

	/// Copies `path` to `destination` on this machine.
	async fn pull(&self, path: &str, destination: &Path) -> Result<()>;

	/// Deletes `path`. Missing files are not an error.
	async fn remove(&self, path: &str) -> Result<()>;
}

/// Which tests keep their artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingPolicy {
	/// Keep artifacts of every test.
	All,
	/// Keep artifacts of failed tests only.
	Failing,
	/// Do not capture.
	#[default]
	None,
}

impl RecordingPolicy {
	pub fn is_enabled(self) -> bool {
		self != RecordingPolicy::None
	}

	/// Whether an artifact of a test that ended with `status` is kept.
	pub fn keeps(self, status: TestStatus) -> bool {
		match self {
			RecordingPolicy::All => true,
			RecordingPolicy::Failing => status == TestStatus::Failed,
			RecordingPolicy::None => false,
		}
	}
}
