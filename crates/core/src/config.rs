//! Run configuration.
//!
//! A [`RunConfig`] is loaded once (usually by the binary, from the file named in
//! `MDRIVE_CONFIG`) and handed to the components that need it. Nothing below
//! the session reads the environment on its own, apart from SDK discovery in
//! [`crate::environment`].
//!
//! ```json
//! {
//!   "configuration": "android.emu.debug",
//!   "device": {
//!     "type": "android.emulator",
//!     "name": "Pixel_7_API_34",
//!     "binaryPath": "app/build/outputs/apk/debug/app-debug.apk",
//!     "testBinaryPath": "app/build/outputs/apk/androidTest/debug/app-debug-androidTest.apk"
//!   },
//!   "session": { "server": "ws://localhost:8099", "sessionId": "test" },
//!   "artifacts": { "recordLogs": "failing", "takeScreenshots": "all" },
//!   "debugSynchronization": 3000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifacts::RecordingPolicy;
use crate::device::{BackendType, LanguageAndLocale, Permissions};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Environment variable carrying the config path from `mdrive run` to the test runner.
pub const CONFIG_ENV: &str = "MDRIVE_CONFIG";

/// Everything a test run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
	/// Name of this configuration, used in the default artifacts directory.
	#[serde(default = "default_configuration")]
	pub configuration: String,
	pub device: DeviceConfig,
	pub session: SessionConfig,
	#[serde(default)]
	pub artifacts: ArtifactsConfig,
	#[serde(default)]
	pub registry: RegistryConfig,
	/// Shut the device down when the run ends.
	#[serde(default)]
	pub cleanup: bool,
	/// Keep the installed app instead of reinstalling it.
	#[serde(default)]
	pub reuse: bool,
	/// Slow-invocation threshold in milliseconds.
	#[serde(default)]
	pub debug_synchronization: Option<u64>,
}

fn default_configuration() -> String {
	"default".to_string()
}

impl RunConfig {
	/// Reads and validates a JSON config file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
		Self::from_json(&text).map_err(|e| match e {
			Error::Config(message) => Error::Config(format!("{}: {}", path.display(), message)),
			other => other,
		})
	}

	pub fn from_json(text: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.device.name.trim().is_empty() {
			return Err(Error::Config("device.name must not be empty".to_string()));
		}
		if self.device.binary_path.as_os_str().is_empty() {
			return Err(Error::Config("device.binaryPath must not be empty".to_string()));
		}
		if self.session.server.trim().is_empty() {
			return Err(Error::Config("session.server must not be empty".to_string()));
		}
		if self.device.boot.attempts == 0 {
			return Err(Error::Config("device.boot.attempts must be at least 1".to_string()));
		}
		Ok(())
	}

	pub fn slow_invocation_threshold(&self) -> Option<Duration> {
		self.debug_synchronization
			.filter(|ms| *ms > 0)
			.map(Duration::from_millis)
	}
}

/// Which device to drive and which app to put on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
	#[serde(rename = "type")]
	pub backend: BackendType,
	/// AVD name, simulator device type, or adb serial, depending on the backend.
	pub name: String,
	pub binary_path: PathBuf,
	/// Android instrumentation apk.
	#[serde(default)]
	pub test_binary_path: Option<PathBuf>,
	/// Read from the binary when absent.
	#[serde(default)]
	pub bundle_id: Option<String>,
	/// Boot emulators without a window.
	#[serde(default)]
	pub headless: bool,
	/// Overrides `ANDROID_SDK_ROOT` / `ANDROID_HOME`.
	#[serde(default)]
	pub sdk_root: Option<PathBuf>,
	#[serde(default)]
	pub boot: BootConfig,
	/// Language and locale the app launches in. Simulators only.
	#[serde(default)]
	pub language_and_locale: Option<LanguageAndLocale>,
	/// Privacy permissions set right after install. Simulators only.
	#[serde(default)]
	pub permissions: Permissions,
}

/// Boot polling budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootConfig {
	pub attempts: u32,
	pub interval_ms: u64,
}

impl Default for BootConfig {
	fn default() -> Self {
		Self {
			attempts: RetryPolicy::BOOT.max_attempts,
			interval_ms: RetryPolicy::BOOT.interval.as_millis() as u64,
		}
	}
}

impl BootConfig {
	pub fn policy(&self) -> RetryPolicy {
		RetryPolicy::new(self.attempts, Duration::from_millis(self.interval_ms))
	}
}

/// Where the app-side relay lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
	pub server: String,
	pub session_id: String,
}

/// Artifact collection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsConfig {
	/// Defaults to `artifacts/<configuration>.<timestamp>`.
	#[serde(default)]
	pub root_dir: Option<PathBuf>,
	#[serde(default)]
	pub record_logs: RecordingPolicy,
	#[serde(default)]
	pub take_screenshots: RecordingPolicy,
	#[serde(default)]
	pub record_videos: RecordingPolicy,
}

/// Location of the shared device registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
	pub lock_file: PathBuf,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			lock_file: std::env::temp_dir()
				.join("mdrive")
				.join("device.registry.json"),
		}
	}
}
