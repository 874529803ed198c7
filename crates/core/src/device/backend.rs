//! The capability set every device backend provides.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::android::AndroidOps;
use super::attached::AttachedBackend;
use super::emulator::EmulatorBackend;
use super::simulator::SimulatorBackend;
use crate::artifacts::ArtifactHost;
use crate::config::DeviceConfig;
use crate::environment;
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::tools::{Adb, Emulator, Simctl};

/// Arguments handed to the app on launch, in a stable order.
pub type LaunchArgs = BTreeMap<String, String>;

/// What to do with one privacy service of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
	#[serde(alias = "YES")]
	Grant,
	#[serde(alias = "NO")]
	Revoke,
	#[serde(alias = "unset")]
	Reset,
}

impl PermissionAction {
	pub fn as_str(self) -> &'static str {
		match self {
			PermissionAction::Grant => "grant",
			PermissionAction::Revoke => "revoke",
			PermissionAction::Reset => "reset",
		}
	}
}

/// Privacy service (`camera`, `photos`, `location-always`, ...) to action.
pub type Permissions = BTreeMap<String, PermissionAction>;

/// Language and region the app starts in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageAndLocale {
	/// ISO language code, such as `de`.
	#[serde(default)]
	pub language: Option<String>,
	/// Locale identifier, such as `de_DE`.
	#[serde(default)]
	pub locale: Option<String>,
}

impl LanguageAndLocale {
	/// Adds the `AppleLanguages` and `AppleLocale` user-default overrides to `args`.
	pub fn apply(&self, args: &mut LaunchArgs) {
		if let Some(language) = &self.language {
			args.insert("AppleLanguages".to_string(), format!("({language})"));
		}
		if let Some(locale) = &self.locale {
			args.insert("AppleLocale".to_string(), locale.clone());
		}
	}
}

/// Which kind of device a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
	#[serde(rename = "android.emulator")]
	Emulator,
	#[serde(rename = "ios.simulator")]
	Simulator,
	#[serde(rename = "android.attached")]
	Physical,
}

impl BackendType {
	pub fn as_str(self) -> &'static str {
		match self {
			BackendType::Emulator => "android.emulator",
			BackendType::Simulator => "ios.simulator",
			BackendType::Physical => "android.attached",
		}
	}
}

impl fmt::Display for BackendType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Source of device identifiers for the [`super::DeviceRegistry`].
#[async_trait]
pub trait DevicePool: Send + Sync {
	/// Identifiers of the existing devices matching `name`.
	async fn device_ids(&self, name: &str) -> Result<Vec<String>>;

	/// Creates a device matching `name` and returns its identifier.
	async fn create_device(&self, name: &str) -> Result<String>;
}

/// Backend-specific device operations.
///
/// A device has two names: the registry `device_id` (AVD name, simulator
/// udid, adb serial) and, once it runs, a `handle` used to talk to it (adb
/// serial or udid). Callers only ever see this trait.
#[async_trait]
pub trait DeviceBackend: DevicePool {
	fn backend_type(&self) -> BackendType;

	/// Handle of the device if it is already running.
	async fn running_handle(&self, device_id: &str) -> Result<Option<String>>;

	/// Starts a stopped device without waiting for it.
	async fn cold_boot(&self, device_id: &str) -> Result<()>;

	/// One boot-completion probe: the handle once the device is fully booted.
	async fn probe_boot(&self, device_id: &str) -> Result<Option<String>>;

	/// Readies a booted device for tests.
	async fn prepare(&self, _handle: &str) -> Result<()> {
		Ok(())
	}

	async fn install_app(&self, handle: &str, binary: &Path, test_binary: Option<&Path>) -> Result<()>;

	async fn uninstall_app(&self, handle: &str, bundle_id: &str) -> Result<()>;

	/// Launches the app and returns its process id.
	async fn launch_app(&self, handle: &str, bundle_id: &str, args: &LaunchArgs) -> Result<u32>;

	async fn terminate_app(&self, handle: &str, bundle_id: &str) -> Result<()>;

	async fn send_to_home(&self, handle: &str) -> Result<()>;

	async fn set_location(&self, handle: &str, latitude: f64, longitude: f64) -> Result<()>;

	/// Grants, revokes or resets privacy permissions of an installed app.
	async fn set_permissions(&self, _handle: &str, _bundle_id: &str, _permissions: &Permissions) -> Result<()> {
		Err(Error::Unsupported {
			backend: self.backend_type().as_str(),
			operation: "setPermissions",
		})
	}

	/// Stops the device. Must succeed on a device that is already stopped.
	async fn shutdown(&self, handle: &str) -> Result<()>;

	/// Wipes the device back to factory state and boots it again.
	async fn reset_content_and_settings(&self, _handle: &str) -> Result<()> {
		Err(Error::Unsupported {
			backend: self.backend_type().as_str(),
			operation: "resetContentAndSettings",
		})
	}

	/// Reads the app identifier from the app binary.
	async fn bundle_id_from_binary(&self, binary: &Path) -> Result<String>;

	/// Capture primitives bound to the running device.
	fn artifact_host(&self, handle: &str) -> Arc<dyn ArtifactHost>;
}

/// Builds the backend named by `config`.
pub fn create_backend(config: &DeviceConfig, runner: Arc<dyn CommandRunner>) -> Result<Arc<dyn DeviceBackend>> {
	match config.backend {
		BackendType::Simulator => Ok(Arc::new(SimulatorBackend::new(Simctl::new(runner.clone()), runner))),
		BackendType::Emulator | BackendType::Physical => {
			let sdk_root = environment::android_sdk_root(config.sdk_root.as_deref())?;
			let adb = Adb::new(
				runner.clone(),
				environment::adb_path(&sdk_root).display().to_string(),
			);
			let ops = AndroidOps::new(adb, runner.clone(), sdk_root.clone());

			if config.backend == BackendType::Physical {
				return Ok(Arc::new(AttachedBackend::new(ops)));
			}
			let emulator = Emulator::new(
				runner,
				environment::emulator_path(&sdk_root).display().to_string(),
			);
			Ok(Arc::new(EmulatorBackend::new(
				ops,
				emulator,
				environment::avd_home()?,
				config.headless,
			)))
		}
	}
}
