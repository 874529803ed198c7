//! Operations shared by Android emulators and attached devices.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::LaunchArgs;
use crate::artifacts::ArtifactHost;
use crate::environment;
use crate::error::{Error, Result};
use crate::exec::{BackgroundProcess, CommandRunner};
use crate::retry::{RetryPolicy, retry};
use crate::tools::{Aapt, Adb, LogcatOptions};

/// adb-level device handling, composed into the emulator and attached
/// backends.
pub struct AndroidOps {
	adb: Adb,
	runner: Arc<dyn CommandRunner>,
	sdk_root: PathBuf,
	/// Running instrumentation per adb serial.
	instrumentation: Mutex<HashMap<String, Box<dyn BackgroundProcess>>>,
	pid_policy: RetryPolicy,
}

impl AndroidOps {
	pub fn new(adb: Adb, runner: Arc<dyn CommandRunner>, sdk_root: PathBuf) -> Self {
		Self {
			adb,
			runner,
			sdk_root,
			instrumentation: Mutex::new(HashMap::new()),
			pid_policy: RetryPolicy::new(20, Duration::from_millis(500)),
		}
	}

	pub fn adb(&self) -> &Adb {
		&self.adb
	}

	pub fn sdk_root(&self) -> &Path {
		&self.sdk_root
	}

	pub async fn prepare(&self, serial: &str) -> Result<()> {
		let api = self.adb.api_level(serial).await?;
		tracing::debug!(serial, api, "Android device ready");
		self.adb.unlock_screen(serial).await
	}

	pub async fn install(&self, serial: &str, binary: &Path, test_binary: Option<&Path>) -> Result<()> {
		self.adb.install(serial, binary).await?;
		if let Some(test_binary) = test_binary {
			self.adb.install(serial, test_binary).await?;
		}
		Ok(())
	}

	pub async fn uninstall(&self, serial: &str, package: &str) -> Result<()> {
		self.adb.uninstall(serial, package).await?;
		self.adb.uninstall(serial, &format!("{package}.test")).await
	}

	/// Starts the app through its instrumentation and waits for its pid.
	pub async fn launch(&self, serial: &str, package: &str, args: &LaunchArgs) -> Result<u32> {
		self.stop_instrumentation(serial).await;

		let runner_class = self.adb.instrumentation_runner(serial, package).await?;
		let args: Vec<(String, String)> = args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
		let process = self.adb.instrument(serial, &runner_class, &args).await?;
		self.instrumentation.lock().insert(serial.to_string(), process);

		retry(self.pid_policy, || async move {
			self.adb.pidof(serial, package).await?.ok_or_else(|| Error::Command {
				command: format!("pidof {package}"),
				code: None,
				stderr: format!("{package} is not running on {serial}"),
			})
		})
		.await
	}

	pub async fn terminate(&self, serial: &str, package: &str) -> Result<()> {
		self.stop_instrumentation(serial).await;
		self.adb.force_stop(serial, package).await
	}

	async fn stop_instrumentation(&self, serial: &str) {
		let process = self.instrumentation.lock().remove(serial);
		if let Some(process) = process {
			if let Err(e) = process.interrupt().await {
				tracing::debug!(serial, "Stopping instrumentation: {}", e);
			}
		}
	}

	pub async fn send_to_home(&self, serial: &str) -> Result<()> {
		self.adb.press_home(serial).await
	}

	pub async fn package_name(&self, apk: &Path) -> Result<String> {
		let aapt_path = environment::aapt_path(&self.sdk_root)?;
		Aapt::new(Arc::clone(&self.runner), aapt_path.display().to_string())
			.package_name(apk)
			.await
	}

	pub fn artifact_host(&self, serial: &str) -> Arc<dyn ArtifactHost> {
		Arc::new(AndroidArtifactHost {
			adb: self.adb.clone(),
			serial: serial.to_string(),
			counter: AtomicU32::new(0),
		})
	}

	#[cfg(test)]
	pub(crate) fn with_pid_policy(mut self, policy: RetryPolicy) -> Self {
		self.pid_policy = policy;
		self
	}
}

/// Captures on an adb device; files live under `/sdcard` until pulled.
pub struct AndroidArtifactHost {
	adb: Adb,
	serial: String,
	counter: AtomicU32,
}

#[async_trait]
impl ArtifactHost for AndroidArtifactHost {
	fn temporary_path(&self, extension: &str) -> String {
		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		format!("/sdcard/mdrive_{}_{}.{}", std::process::id(), n, extension)
	}

	async fn start_log(&self, path: &str, pid: Option<u32>) -> Result<Box<dyn BackgroundProcess>> {
		let since = self.adb.now(&self.serial).await?;
		let options = LogcatOptions {
			pid,
			since: Some(since),
		};
		self.adb.logcat(&self.serial, path, &options).await
	}

	async fn start_video(&self, path: &str) -> Result<Box<dyn BackgroundProcess>> {
		self.adb.screenrecord(&self.serial, path).await
	}

	async fn take_screenshot(&self, path: &str) -> Result<()> {
		self.adb.screencap(&self.serial, path).await
	}

	async fn file_size(&self, path: &str) -> Result<Option<u64>> {
		self.adb.file_size(&self.serial, path).await
	}

	async fn pull(&self, path: &str, destination: &Path) -> Result<()> {
		self.adb.pull(&self.serial, path, destination).await
	}

	async fn remove(&self, path: &str) -> Result<()> {
		self.adb.rm(&self.serial, path).await
	}
}
