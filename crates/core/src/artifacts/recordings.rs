//! Concrete recordings over an [`ArtifactHost`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::ArtifactHost;
use super::artifact::{Completion, Recording, StartArgs};
use crate::error::{Error, Result};
use crate::exec::BackgroundProcess;
use crate::retry::{RetryPolicy, retry};

/// Time a capture process needs before its file shows up, and before it has
/// flushed its last lines.
const SETTLE: Duration = Duration::from_millis(300);

/// Streams the device log to a file for the duration of a test.
///
/// `start` launches the capture and checks in the background that the log
/// file appears. `stop` waits for that check, then interrupts the capture
/// after a short settle; `save` and `discard` wait until the capture has
/// released the file.
pub struct LogRecording {
	host: Arc<dyn ArtifactHost>,
	path: String,
	verify_policy: RetryPolicy,
	pid: Mutex<Option<u32>>,
	process: Mutex<Option<Box<dyn BackgroundProcess>>>,
	verification: Mutex<Option<JoinHandle<Result<()>>>>,
	released: Mutex<Completion>,
}

impl LogRecording {
	pub fn new(host: Arc<dyn ArtifactHost>, pid: Option<u32>) -> Self {
		let path = host.temporary_path("log");
		Self {
			host,
			path,
			verify_policy: RetryPolicy::CAPTURE_FILE,
			pid: Mutex::new(pid),
			process: Mutex::new(None),
			verification: Mutex::new(None),
			released: Mutex::new(Completion::done()),
		}
	}

	pub fn with_verify_policy(mut self, policy: RetryPolicy) -> Self {
		self.verify_policy = policy;
		self
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	async fn verify_log_created(host: Arc<dyn ArtifactHost>, path: String, policy: RetryPolicy) -> Result<()> {
		tokio::time::sleep(SETTLE).await;
		retry(policy, || {
			let host = Arc::clone(&host);
			let path = path.clone();
			async move {
				match host.file_size(&path).await? {
					Some(size) if size > 0 => Ok(()),
					_ => Err(Error::ArtifactIo {
						artifact: "log".to_string(),
						operation: "start",
						message: format!("the log is not being recorded at {path}"),
					}),
				}
			}
		})
		.await
	}
}

#[async_trait]
impl Recording for LogRecording {
	async fn start(&self, args: StartArgs) -> Result<()> {
		let pid = {
			let mut pid = self.pid.lock();
			if args.pid.is_some() {
				*pid = args.pid;
			}
			*pid
		};

		// A restarted capture must not reopen the file before the old one let go.
		let released = self.released.lock().clone();
		released.wait().await;

		let process = self.host.start_log(&self.path, pid).await?;
		*self.process.lock() = Some(process);

		let verification = tokio::spawn(Self::verify_log_created(
			Arc::clone(&self.host),
			self.path.clone(),
			self.verify_policy,
		));
		*self.verification.lock() = Some(verification);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		let verification = self.verification.lock().take();
		let verified = match verification {
			Some(task) => match task.await {
				Ok(result) => result,
				Err(e) => Err(Error::ArtifactIo {
					artifact: "log".to_string(),
					operation: "start",
					message: e.to_string(),
				}),
			},
			None => Ok(()),
		};

		let process = self.process.lock().take();
		if let Some(process) = process {
			let (handle, released) = Completion::new();
			*self.released.lock() = released;
			tokio::spawn(async move {
				tokio::time::sleep(SETTLE).await;
				if let Err(e) = process.interrupt().await {
					tracing::warn!("Failed to stop log capture: {}", e);
				}
				handle.complete();
			});
		}

		verified
	}

	async fn save(&self, destination: &Path) -> Result<()> {
		let released = self.released.lock().clone();
		released.wait().await;
		self.host.pull(&self.path, destination).await?;
		self.host.remove(&self.path).await
	}

	async fn discard(&self) -> Result<()> {
		let released = self.released.lock().clone();
		released.wait().await;
		self.host.remove(&self.path).await
	}
}

/// A single screen capture. Taken on `start`.
pub struct ScreenshotRecording {
	host: Arc<dyn ArtifactHost>,
	path: String,
}

impl ScreenshotRecording {
	pub fn new(host: Arc<dyn ArtifactHost>) -> Self {
		let path = host.temporary_path("png");
		Self { host, path }
	}
}

#[async_trait]
impl Recording for ScreenshotRecording {
	async fn start(&self, _args: StartArgs) -> Result<()> {
		self.host.take_screenshot(&self.path).await
	}

	async fn save(&self, destination: &Path) -> Result<()> {
		self.host.pull(&self.path, destination).await?;
		self.host.remove(&self.path).await
	}

	async fn discard(&self) -> Result<()> {
		self.host.remove(&self.path).await
	}
}

/// Screen recording for the duration of a test.
pub struct VideoRecording {
	host: Arc<dyn ArtifactHost>,
	path: String,
	process: Mutex<Option<Box<dyn BackgroundProcess>>>,
}

impl VideoRecording {
	pub fn new(host: Arc<dyn ArtifactHost>) -> Self {
		let path = host.temporary_path("mp4");
		Self {
			host,
			path,
			process: Mutex::new(None),
		}
	}
}

#[async_trait]
impl Recording for VideoRecording {
	async fn start(&self, _args: StartArgs) -> Result<()> {
		let process = self.host.start_video(&self.path).await?;
		*self.process.lock() = Some(process);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		let process = self.process.lock().take();
		if let Some(process) = process {
			// The recorder finalizes the container on SIGINT; wait for it to exit.
			process.interrupt().await?;
			tokio::time::sleep(SETTLE).await;
		}
		Ok(())
	}

	async fn save(&self, destination: &Path) -> Result<()> {
		self.host.pull(&self.path, destination).await?;
		self.host.remove(&self.path).await
	}

	async fn discard(&self) -> Result<()> {
		self.host.remove(&self.path).await
	}
}
