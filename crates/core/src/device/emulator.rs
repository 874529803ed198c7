use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::android::AndroidOps;
use super::{BackendType, DeviceBackend, DevicePool, LaunchArgs};
use crate::artifacts::ArtifactHost;
use crate::environment;
use crate::error::{Error, Result};
use crate::tools::{AdbDeviceKind, Emulator, fix_config_ini_skin_name};

/// Android emulators, one per AVD. Registry ids are AVD names.
pub struct EmulatorBackend {
	ops: AndroidOps,
	emulator: Emulator,
	avd_home: PathBuf,
	headless: bool,
}

impl EmulatorBackend {
	pub fn new(ops: AndroidOps, emulator: Emulator, avd_home: PathBuf, headless: bool) -> Self {
		Self {
			ops,
			emulator,
			avd_home,
			headless,
		}
	}

	/// adb serial of the running emulator for `avd_name`.
	async fn find_serial(&self, avd_name: &str) -> Result<Option<String>> {
		let mut serials: Vec<String> = self
			.ops
			.adb()
			.devices()
			.await?
			.into_iter()
			.filter(|d| d.kind == AdbDeviceKind::Emulator && d.avd_name.as_deref() == Some(avd_name))
			.map(|d| d.serial)
			.collect();

		match serials.len() {
			0 | 1 => Ok(serials.pop()),
			_ => Err(Error::Config(format!(
				"More than one running emulator for AVD {avd_name}: {}",
				serials.join(", ")
			))),
		}
	}
}

#[async_trait]
impl DevicePool for EmulatorBackend {
	async fn device_ids(&self, name: &str) -> Result<Vec<String>> {
		let avds = self.emulator.list_avds().await?;
		Ok(avds.into_iter().filter(|avd| avd == name).collect())
	}

	async fn create_device(&self, name: &str) -> Result<String> {
		let avds = self.emulator.list_avds().await?;
		if avds.is_empty() {
			let avdmanager = environment::avdmanager_path(self.ops.sdk_root());
			return Err(Error::Config(format!(
				"No Android emulator is configured. Create one first, e.g. {} create avd --name Pixel_API_34 --package 'system-images;android-34;google_apis;x86_64'",
				avdmanager.display()
			)));
		}
		Err(Error::Config(format!(
			"Cannot boot Android emulator '{name}'; available AVDs: {}",
			avds.join(", ")
		)))
	}
}

#[async_trait]
impl DeviceBackend for EmulatorBackend {
	fn backend_type(&self) -> BackendType {
		BackendType::Emulator
	}

	async fn running_handle(&self, device_id: &str) -> Result<Option<String>> {
		self.find_serial(device_id).await
	}

	async fn cold_boot(&self, device_id: &str) -> Result<()> {
		fix_config_ini_skin_name(&self.avd_home, device_id)?;
		// The emulator outlives the handle.
		let _process = self.emulator.boot(device_id, self.headless).await?;
		Ok(())
	}

	async fn probe_boot(&self, device_id: &str) -> Result<Option<String>> {
		let Some(serial) = self.find_serial(device_id).await? else {
			return Ok(None);
		};
		let booted = self.ops.adb().is_boot_complete(&serial).await?;
		Ok(booted.then_some(serial))
	}

	async fn prepare(&self, handle: &str) -> Result<()> {
		self.ops.prepare(handle).await
	}

	async fn install_app(&self, handle: &str, binary: &Path, test_binary: Option<&Path>) -> Result<()> {
		self.ops.install(handle, binary, test_binary).await
	}

	async fn uninstall_app(&self, handle: &str, bundle_id: &str) -> Result<()> {
		self.ops.uninstall(handle, bundle_id).await
	}

	async fn launch_app(&self, handle: &str, bundle_id: &str, args: &LaunchArgs) -> Result<u32> {
		self.ops.launch(handle, bundle_id, args).await
	}

	async fn terminate_app(&self, handle: &str, bundle_id: &str) -> Result<()> {
		self.ops.terminate(handle, bundle_id).await
	}

	async fn send_to_home(&self, handle: &str) -> Result<()> {
		self.ops.send_to_home(handle).await
	}

	async fn set_location(&self, handle: &str, latitude: f64, longitude: f64) -> Result<()> {
		self.ops.adb().geo_fix(handle, latitude, longitude).await
	}

	async fn shutdown(&self, handle: &str) -> Result<()> {
		let running = self
			.ops
			.adb()
			.devices()
			.await?
			.iter()
			.any(|d| d.serial == handle);
		if !running {
			tracing::debug!(serial = handle, "Emulator already stopped");
			return Ok(());
		}
		self.ops.adb().emu_kill(handle).await
	}

	async fn bundle_id_from_binary(&self, binary: &Path) -> Result<String> {
		self.ops.package_name(binary).await
	}

	fn artifact_host(&self, handle: &str) -> Arc<dyn ArtifactHost> {
		self.ops.artifact_host(handle)
	}
}
