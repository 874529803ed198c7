use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use super::{BackendType, DeviceBackend, DevicePool, LaunchArgs, Permissions};
use crate::artifacts::ArtifactHost;
use crate::error::{Error, Result};
use crate::exec::{BackgroundProcess, CommandRunner};
use crate::tools::{Simctl, plist};

/// iOS simulators. Registry ids are simulator udids; so are handles.
pub struct SimulatorBackend {
	simctl: Simctl,
	runner: Arc<dyn CommandRunner>,
}

impl SimulatorBackend {
	pub fn new(simctl: Simctl, runner: Arc<dyn CommandRunner>) -> Self {
		Self { simctl, runner }
	}

	async fn is_booted(&self, udid: &str) -> Result<bool> {
		Ok(self
			.simctl
			.device(udid)
			.await?
			.is_some_and(|d| d.is_booted()))
	}
}

#[async_trait]
impl DevicePool for SimulatorBackend {
	async fn device_ids(&self, name: &str) -> Result<Vec<String>> {
		Ok(self
			.simctl
			.find_by_name(name)
			.await?
			.into_iter()
			.map(|d| d.udid)
			.collect())
	}

	async fn create_device(&self, name: &str) -> Result<String> {
		self.simctl.create(name).await
	}
}

#[async_trait]
impl DeviceBackend for SimulatorBackend {
	fn backend_type(&self) -> BackendType {
		BackendType::Simulator
	}

	async fn running_handle(&self, device_id: &str) -> Result<Option<String>> {
		Ok(self
			.is_booted(device_id)
			.await?
			.then(|| device_id.to_string()))
	}

	async fn cold_boot(&self, device_id: &str) -> Result<()> {
		self.simctl.boot(device_id).await
	}

	async fn probe_boot(&self, device_id: &str) -> Result<Option<String>> {
		self.running_handle(device_id).await
	}

	async fn install_app(&self, handle: &str, binary: &Path, _test_binary: Option<&Path>) -> Result<()> {
		self.simctl.install(handle, binary).await
	}

	async fn uninstall_app(&self, handle: &str, bundle_id: &str) -> Result<()> {
		self.simctl.uninstall(handle, bundle_id).await
	}

	async fn launch_app(&self, handle: &str, bundle_id: &str, args: &LaunchArgs) -> Result<u32> {
		let args: Vec<(String, String)> = args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
		self.simctl.launch(handle, bundle_id, &args).await
	}

	async fn terminate_app(&self, handle: &str, bundle_id: &str) -> Result<()> {
		self.simctl.terminate(handle, bundle_id).await
	}

	async fn send_to_home(&self, handle: &str) -> Result<()> {
		self.simctl.send_to_home(handle).await
	}

	async fn set_location(&self, handle: &str, latitude: f64, longitude: f64) -> Result<()> {
		self.simctl.set_location(handle, latitude, longitude).await
	}

	async fn set_permissions(&self, handle: &str, bundle_id: &str, permissions: &Permissions) -> Result<()> {
		self.simctl.set_permissions(handle, bundle_id, permissions).await
	}

	async fn shutdown(&self, handle: &str) -> Result<()> {
		self.simctl.shutdown(handle).await
	}

	/// Shuts down, erases and boots the simulator again.
	async fn reset_content_and_settings(&self, handle: &str) -> Result<()> {
		self.simctl.shutdown(handle).await?;
		self.simctl.erase(handle).await?;
		self.simctl.boot(handle).await
	}

	async fn bundle_id_from_binary(&self, binary: &Path) -> Result<String> {
		plist::bundle_id(&self.runner, binary).await
	}

	fn artifact_host(&self, handle: &str) -> Arc<dyn ArtifactHost> {
		Arc::new(SimulatorArtifactHost::new(self.simctl.clone(), handle))
	}
}

/// Captures of a simulator land directly on this machine, in a temporary
/// directory.
pub struct SimulatorArtifactHost {
	simctl: Simctl,
	udid: String,
	dir: PathBuf,
	counter: AtomicU32,
}

impl SimulatorArtifactHost {
	pub fn new(simctl: Simctl, udid: &str) -> Self {
		let dir = std::env::temp_dir().join(format!("mdrive-{}-{}", std::process::id(), udid));
		Self {
			simctl,
			udid: udid.to_string(),
			dir,
			counter: AtomicU32::new(0),
		}
	}

	async fn ensure_dir(&self) -> Result<()> {
		tokio::fs::create_dir_all(&self.dir).await?;
		Ok(())
	}
}

#[async_trait]
impl ArtifactHost for SimulatorArtifactHost {
	fn temporary_path(&self, extension: &str) -> String {
		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		self.dir.join(format!("{n}.{extension}")).display().to_string()
	}

	async fn start_log(&self, path: &str, pid: Option<u32>) -> Result<Box<dyn BackgroundProcess>> {
		self.ensure_dir().await?;
		self.simctl.log_stream(&self.udid, path, pid).await
	}

	async fn start_video(&self, path: &str) -> Result<Box<dyn BackgroundProcess>> {
		self.ensure_dir().await?;
		self.simctl.record_video(&self.udid, path).await
	}

	async fn take_screenshot(&self, path: &str) -> Result<()> {
		self.ensure_dir().await?;
		self.simctl.screenshot(&self.udid, path).await
	}

	async fn file_size(&self, path: &str) -> Result<Option<u64>> {
		match tokio::fs::metadata(path).await {
			Ok(meta) => Ok(Some(meta.len())),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(Error::Io(e)),
		}
	}

	async fn pull(&self, path: &str, destination: &Path) -> Result<()> {
		if let Some(parent) = destination.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::copy(path, destination).await?;
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<()> {
		match tokio::fs::remove_file(path).await {
			Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
			_ => Ok(()),
		}
	}
}
