use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::android::AndroidOps;
use super::{BackendType, DeviceBackend, DevicePool, LaunchArgs};
use crate::artifacts::ArtifactHost;
use crate::error::{Error, Result};
use crate::tools::AdbDeviceKind;

const BACKEND: &str = "android.attached";

/// Physical Android devices on adb. Registry ids are adb serials.
///
/// These cannot be booted, created or shut down from here; they are used as
/// they are.
pub struct AttachedBackend {
	ops: AndroidOps,
}

impl AttachedBackend {
	pub fn new(ops: AndroidOps) -> Self {
		Self { ops }
	}

	async fn online(&self, serial: &str) -> Result<bool> {
		Ok(self
			.ops
			.adb()
			.devices()
			.await?
			.iter()
			.any(|d| d.serial == serial && d.is_online()))
	}
}

#[async_trait]
impl DevicePool for AttachedBackend {
	/// Online devices whose serial is `name`, or every online device for `*`.
	async fn device_ids(&self, name: &str) -> Result<Vec<String>> {
		Ok(self
			.ops
			.adb()
			.devices()
			.await?
			.into_iter()
			.filter(|d| d.kind == AdbDeviceKind::Device && d.is_online())
			.filter(|d| name == "*" || d.serial == name)
			.map(|d| d.serial)
			.collect())
	}

	async fn create_device(&self, name: &str) -> Result<String> {
		Err(Error::Config(format!(
			"No free attached device matches '{name}'; check `adb devices`"
		)))
	}
}

#[async_trait]
impl DeviceBackend for AttachedBackend {
	fn backend_type(&self) -> BackendType {
		BackendType::Physical
	}

	async fn running_handle(&self, device_id: &str) -> Result<Option<String>> {
		Ok(self.online(device_id).await?.then(|| device_id.to_string()))
	}

	async fn cold_boot(&self, _device_id: &str) -> Result<()> {
		Err(Error::Unsupported {
			backend: BACKEND,
			operation: "boot",
		})
	}

	async fn probe_boot(&self, device_id: &str) -> Result<Option<String>> {
		let booted = self.ops.adb().is_boot_complete(device_id).await?;
		Ok(booted.then(|| device_id.to_string()))
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

	async fn set_location(&self, _handle: &str, _latitude: f64, _longitude: f64) -> Result<()> {
		Err(Error::Unsupported {
			backend: BACKEND,
			operation: "setLocation",
		})
	}

	/// Physical devices stay on.
	async fn shutdown(&self, _handle: &str) -> Result<()> {
		Ok(())
	}

	async fn bundle_id_from_binary(&self, binary: &Path) -> Result<String> {
		self.ops.package_name(binary).await
	}

	fn artifact_host(&self, handle: &str) -> Arc<dyn ArtifactHost> {
		self.ops.artifact_host(handle)
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;
	use crate::exec::CommandOutput;
	use crate::testing::FakeRunner;
	use crate::tools::Adb;

	fn backend() -> (Arc<FakeRunner>, AttachedBackend) {
		let runner = Arc::new(FakeRunner::new());
		runner.respond_always(
			"adb devices",
			CommandOutput::ok(
				"List of devices attached\nR58M\tdevice\nZY22\tunauthorized\nemulator-5554\tdevice\n",
			),
		);
		let ops = AndroidOps::new(Adb::new(runner.clone(), "adb"), runner.clone(), PathBuf::from("/sdk"));
		(runner, AttachedBackend::new(ops))
	}

	#[tokio::test]
	async fn pool_contains_online_physical_devices_only() {
		let (_, backend) = backend();
		assert_eq!(backend.device_ids("*").await.unwrap(), vec!["R58M"]);
		assert!(backend.device_ids("ZY22").await.unwrap().is_empty());
		assert!(matches!(backend.create_device("ZY22").await, Err(Error::Config(_))));
	}

	#[tokio::test]
	async fn online_device_is_warm_and_cannot_be_booted() {
		let (_, backend) = backend();
		assert_eq!(backend.running_handle("R58M").await.unwrap().as_deref(), Some("R58M"));
		assert_eq!(backend.running_handle("ZY22").await.unwrap(), None);
		assert!(matches!(
			backend.cold_boot("ZY22").await,
			Err(Error::Unsupported { operation: "boot", .. })
		));
	}

	#[tokio::test]
	async fn shutdown_leaves_device_alone() {
		let (runner, backend) = backend();
		backend.shutdown("R58M").await.unwrap();
		assert!(runner.commands().is_empty());
	}

	#[tokio::test]
	async fn permissions_are_not_supported() {
		let (runner, backend) = backend();
		let mut permissions = crate::device::Permissions::new();
		permissions.insert("camera".to_string(), crate::device::PermissionAction::Grant);

		assert!(matches!(
			backend.set_permissions("R58M", "com.example", &permissions).await,
			Err(Error::Unsupported {
				backend: "android.attached",
				operation: "setPermissions"
			})
		));
		assert!(runner.commands().is_empty());
	}
}
