//! Plugins deciding what to capture around each test.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use super::{
	Artifact, ArtifactHost, ArtifactPathBuilder, ArtifactState, LogRecording, Recording,
	RecordingPolicy, ScreenshotRecording, StartArgs, TestSummary, VideoRecording,
};
use crate::device::DeviceEvent;
use crate::error::Result;

/// What a plugin gets to work with on each hook.
#[derive(Clone)]
pub struct PluginContext {
	/// Capture primitives of the acquired device; `None` before the device is up.
	pub host: Option<Arc<dyn ArtifactHost>>,
	pub paths: Arc<ArtifactPathBuilder>,
}

/// Reacts to test and device lifecycle events.
///
/// Every hook defaults to doing nothing. Errors are reported by the
/// [`super::ArtifactsManager`] and never reach the test.
#[async_trait]
pub trait ArtifactPlugin: Send + Sync {
	fn name(&self) -> &str;

	async fn on_before_all(&self, _ctx: &PluginContext) -> Result<()> {
		Ok(())
	}

	async fn on_before_each(&self, _ctx: &PluginContext, _test: &TestSummary) -> Result<()> {
		Ok(())
	}

	async fn on_after_each(&self, _ctx: &PluginContext, _test: &TestSummary) -> Result<()> {
		Ok(())
	}

	/// Waits for everything the plugin still has in flight.
	async fn on_after_all(&self, _ctx: &PluginContext) -> Result<()> {
		Ok(())
	}

	async fn on_device_event(&self, _ctx: &PluginContext, _event: &DeviceEvent) -> Result<()> {
		Ok(())
	}
}

/// Save and discard work running behind the test.
#[derive(Default)]
struct BackgroundSaves {
	tasks: Mutex<JoinSet<()>>,
}

impl BackgroundSaves {
	/// Saves to `destination`, or discards when there is none.
	fn schedule(&self, artifact: Arc<Artifact>, destination: Option<PathBuf>) {
		let mut tasks = self.tasks.lock();
		while let Some(joined) = tasks.try_join_next() {
			if let Err(e) = joined {
				tracing::warn!("Artifact task panicked: {}", e);
			}
		}
		tasks.spawn(async move {
			let result = match destination {
				Some(path) => artifact.save(path).await,
				None => artifact.discard().await,
			};
			if let Err(e) = result {
				tracing::warn!(artifact = %artifact.name(), "{}", e);
			}
		});
	}

	#[cfg(test)]
	fn pending(&self) -> usize {
		self.tasks.lock().len()
	}

	async fn drain(&self) {
		let mut tasks = std::mem::take(&mut *self.tasks.lock());
		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				tracing::warn!("Artifact task panicked: {}", e);
			}
		}
	}
}

/// Kind of capture a [`WholeTestRecorderPlugin`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WholeTestKind {
	Log,
	Video,
}

impl WholeTestKind {
	fn artifact_name(self) -> &'static str {
		match self {
			WholeTestKind::Log => "log",
			WholeTestKind::Video => "video",
		}
	}

	fn file_name(self, index: usize) -> String {
		let (stem, extension) = match self {
			WholeTestKind::Log => ("device", "log"),
			WholeTestKind::Video => ("test", "mp4"),
		};
		match index {
			0 => format!("{stem}.{extension}"),
			n => format!("{stem}-{n}.{extension}"),
		}
	}
}

/// Records from the start of a test until its end.
///
/// Logs follow the app process: when the app is relaunched during a test,
/// the running capture is stopped and a new one is started for the new pid.
/// All captures of the test are kept or dropped together according to the
/// policy.
pub struct WholeTestRecorderPlugin {
	kind: WholeTestKind,
	policy: RecordingPolicy,
	pid: Mutex<Option<u32>>,
	/// Captures of the running test, oldest first.
	current: Mutex<Vec<Arc<Artifact>>>,
	saves: BackgroundSaves,
}

impl WholeTestRecorderPlugin {
	pub fn new(kind: WholeTestKind, policy: RecordingPolicy) -> Self {
		Self {
			kind,
			policy,
			pid: Mutex::new(None),
			current: Mutex::new(Vec::new()),
			saves: BackgroundSaves::default(),
		}
	}

	pub fn logs(policy: RecordingPolicy) -> Self {
		Self::new(WholeTestKind::Log, policy)
	}

	pub fn videos(policy: RecordingPolicy) -> Self {
		Self::new(WholeTestKind::Video, policy)
	}

	async fn start_capture(&self, host: Arc<dyn ArtifactHost>) -> Result<()> {
		let pid = *self.pid.lock();
		let recording: Arc<dyn Recording> = match self.kind {
			WholeTestKind::Log => Arc::new(LogRecording::new(host, pid)),
			WholeTestKind::Video => Arc::new(VideoRecording::new(host)),
		};
		let artifact = Arc::new(Artifact::new(self.kind.artifact_name(), recording));
		self.current.lock().push(Arc::clone(&artifact));
		artifact.start(StartArgs { pid }).await
	}
}

#[async_trait]
impl ArtifactPlugin for WholeTestRecorderPlugin {
	fn name(&self) -> &str {
		match self.kind {
			WholeTestKind::Log => "log",
			WholeTestKind::Video => "video",
		}
	}

	async fn on_before_each(&self, ctx: &PluginContext, _test: &TestSummary) -> Result<()> {
		if !self.policy.is_enabled() {
			return Ok(());
		}
		let Some(host) = ctx.host.clone() else {
			return Ok(());
		};
		self.start_capture(host).await
	}

	async fn on_after_each(&self, ctx: &PluginContext, test: &TestSummary) -> Result<()> {
		let artifacts = std::mem::take(&mut *self.current.lock());
		let keep = self.policy.keeps(test.status);
		for (index, artifact) in artifacts.into_iter().enumerate() {
			let destination = keep.then(|| ctx.paths.test_artifact(test, &self.kind.file_name(index)));
			self.saves.schedule(artifact, destination);
		}
		Ok(())
	}

	/// Drops captures of a test whose end was never reported, then waits.
	async fn on_after_all(&self, _ctx: &PluginContext) -> Result<()> {
		let unfinished = std::mem::take(&mut *self.current.lock());
		if !unfinished.is_empty() {
			tracing::debug!(plugin = self.name(), count = unfinished.len(), "Discarding unfinished captures");
		}
		for artifact in unfinished {
			self.saves.schedule(artifact, None);
		}
		self.saves.drain().await;
		Ok(())
	}

	async fn on_device_event(&self, ctx: &PluginContext, event: &DeviceEvent) -> Result<()> {
		let DeviceEvent::LaunchApp { pid, .. } = event else {
			return Ok(());
		};
		*self.pid.lock() = Some(*pid);

		if self.kind != WholeTestKind::Log {
			return Ok(());
		}
		let running = self
			.current
			.lock()
			.last()
			.is_some_and(|a| a.state() == ArtifactState::Running);
		let Some(host) = ctx.host.clone().filter(|_| running) else {
			return Ok(());
		};

		// The old capture is filtered on a pid that no longer exists.
		let previous = self.current.lock().last().cloned();
		if let Some(previous) = previous {
			previous.stop().await?;
		}
		self.start_capture(host).await
	}
}

/// Takes a screenshot before and after each test.
pub struct TwoSnapshotsPerTestPlugin {
	policy: RecordingPolicy,
	before: Mutex<Option<Arc<Artifact>>>,
	saves: BackgroundSaves,
}

impl TwoSnapshotsPerTestPlugin {
	pub fn new(policy: RecordingPolicy) -> Self {
		Self {
			policy,
			before: Mutex::new(None),
			saves: BackgroundSaves::default(),
		}
	}

	async fn snapshot(host: Arc<dyn ArtifactHost>, name: &str) -> Result<Arc<Artifact>> {
		let artifact = Arc::new(Artifact::new(name, Arc::new(ScreenshotRecording::new(host))));
		artifact.start(StartArgs::default()).await?;
		Ok(artifact)
	}
}

#[async_trait]
impl ArtifactPlugin for TwoSnapshotsPerTestPlugin {
	fn name(&self) -> &str {
		"screenshot"
	}

	async fn on_before_each(&self, ctx: &PluginContext, _test: &TestSummary) -> Result<()> {
		if !self.policy.is_enabled() {
			return Ok(());
		}
		let Some(host) = ctx.host.clone() else {
			return Ok(());
		};
		let artifact = Self::snapshot(host, "beforeEach").await?;
		*self.before.lock() = Some(artifact);
		Ok(())
	}

	async fn on_after_each(&self, ctx: &PluginContext, test: &TestSummary) -> Result<()> {
		let before = self.before.lock().take();
		if !self.policy.is_enabled() {
			return Ok(());
		}
		let keep = self.policy.keeps(test.status);

		if let Some(before) = before {
			let destination = keep.then(|| ctx.paths.test_artifact(test, "beforeEach.png"));
			self.saves.schedule(before, destination);
		}

		// Not worth a screenshot if it is going to be thrown away.
		if !keep {
			return Ok(());
		}
		let Some(host) = ctx.host.clone() else {
			return Ok(());
		};
		let after = Self::snapshot(host, "afterEach").await?;
		self.saves
			.schedule(after, Some(ctx.paths.test_artifact(test, "afterEach.png")));
		Ok(())
	}

	async fn on_after_all(&self, _ctx: &PluginContext) -> Result<()> {
		if let Some(before) = self.before.lock().take() {
			self.saves.schedule(before, None);
		}
		self.saves.drain().await;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::artifacts::TestStatus;
	use crate::testing::FakeHost;

	fn context(host: &Arc<FakeHost>, root: &std::path::Path) -> PluginContext {
		PluginContext {
			host: Some(host.clone()),
			paths: Arc::new(ArtifactPathBuilder::new(root)),
		}
	}

	fn launch(pid: u32) -> DeviceEvent {
		DeviceEvent::LaunchApp {
			device_id: "emulator-5554".to_string(),
			bundle_id: "com.example".to_string(),
			pid,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn failing_policy_keeps_log_of_failed_test_only() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = WholeTestRecorderPlugin::logs(RecordingPolicy::Failing);

		let passed = TestSummary::new("a", "suite a", TestStatus::Passed);
		plugin.on_before_each(&ctx, &TestSummary::running("a", "suite a")).await.unwrap();
		plugin.on_after_each(&ctx, &passed).await.unwrap();

		let failed = TestSummary::new("b", "suite b", TestStatus::Failed);
		plugin.on_before_each(&ctx, &TestSummary::running("b", "suite b")).await.unwrap();
		plugin.on_after_each(&ctx, &failed).await.unwrap();

		plugin.on_after_all(&ctx).await.unwrap();

		assert!(!dir.path().join("suite a").exists());
		assert!(dir.path().join("suite b").join("device.log").exists());
		assert_eq!(host.calls().iter().filter(|c| c.starts_with("pull")).count(), 1);
		assert_eq!(host.calls().iter().filter(|c| c.starts_with("remove")).count(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn log_capture_uses_latest_app_pid() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = WholeTestRecorderPlugin::logs(RecordingPolicy::All);

		plugin.on_device_event(&ctx, &launch(77)).await.unwrap();
		plugin.on_before_each(&ctx, &TestSummary::running("a", "a")).await.unwrap();

		assert!(host.calls()[0].ends_with("Some(77)"));
	}

	#[tokio::test(start_paused = true)]
	async fn relaunch_during_test_restarts_log_capture() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = WholeTestRecorderPlugin::logs(RecordingPolicy::All);

		plugin.on_device_event(&ctx, &launch(1)).await.unwrap();
		plugin.on_before_each(&ctx, &TestSummary::running("a", "a")).await.unwrap();
		plugin.on_device_event(&ctx, &launch(2)).await.unwrap();
		plugin
			.on_after_each(&ctx, &TestSummary::new("a", "a", TestStatus::Passed))
			.await
			.unwrap();
		plugin.on_after_all(&ctx).await.unwrap();

		let starts: Vec<_> = host
			.calls()
			.into_iter()
			.filter(|c| c.starts_with("start_log"))
			.collect();
		assert_eq!(starts.len(), 2);
		assert!(starts[1].ends_with("Some(2)"));
		assert!(dir.path().join("a").join("device.log").exists());
		assert!(dir.path().join("a").join("device-1.log").exists());
	}

	#[tokio::test]
	async fn disabled_or_hostless_plugins_do_nothing() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let test = TestSummary::running("a", "a");

		let plugin = WholeTestRecorderPlugin::videos(RecordingPolicy::None);
		plugin.on_before_each(&ctx, &test).await.unwrap();

		let hostless = PluginContext {
			host: None,
			paths: ctx.paths.clone(),
		};
		let plugin = TwoSnapshotsPerTestPlugin::new(RecordingPolicy::All);
		plugin.on_before_each(&hostless, &test).await.unwrap();
		plugin.on_after_each(&hostless, &test).await.unwrap();

		assert!(host.calls().is_empty());
	}

	#[tokio::test]
	async fn snapshots_before_and_after_failed_test() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = TwoSnapshotsPerTestPlugin::new(RecordingPolicy::Failing);

		plugin.on_before_each(&ctx, &TestSummary::running("t", "s t")).await.unwrap();
		plugin
			.on_after_each(&ctx, &TestSummary::new("t", "s t", TestStatus::Failed))
			.await
			.unwrap();
		plugin.on_after_all(&ctx).await.unwrap();

		assert!(dir.path().join("s t").join("beforeEach.png").exists());
		assert!(dir.path().join("s t").join("afterEach.png").exists());
	}

	#[tokio::test]
	async fn passed_test_discards_before_snapshot_and_skips_after() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = TwoSnapshotsPerTestPlugin::new(RecordingPolicy::Failing);

		plugin.on_before_each(&ctx, &TestSummary::running("t", "s t")).await.unwrap();
		plugin
			.on_after_each(&ctx, &TestSummary::new("t", "s t", TestStatus::Passed))
			.await
			.unwrap();
		plugin.on_after_all(&ctx).await.unwrap();

		let calls = host.calls();
		assert_eq!(calls.iter().filter(|c| c.starts_with("screenshot")).count(), 1);
		assert!(calls.last().unwrap().starts_with("remove"));
		assert!(!dir.path().join("s t").exists());
	}

	#[tokio::test(start_paused = true)]
	async fn run_end_discards_captures_of_unfinished_test() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = WholeTestRecorderPlugin::videos(RecordingPolicy::All);

		plugin.on_before_each(&ctx, &TestSummary::running("a", "a")).await.unwrap();
		plugin.on_after_all(&ctx).await.unwrap();

		assert_eq!(
			host.calls(),
			vec![
				"start_video /device/tmp/0.mp4",
				"interrupt video /device/tmp/0.mp4",
				"remove /device/tmp/0.mp4",
			]
		);
		assert!(!dir.path().join("a").exists());
	}

	#[tokio::test]
	async fn run_end_discards_orphaned_before_snapshot() {
		let host = FakeHost::new();
		let dir = tempfile::tempdir().unwrap();
		let ctx = context(&host, dir.path());
		let plugin = TwoSnapshotsPerTestPlugin::new(RecordingPolicy::All);

		plugin.on_before_each(&ctx, &TestSummary::running("t", "s t")).await.unwrap();
		plugin.on_after_all(&ctx).await.unwrap();

		let calls = host.calls();
		assert_eq!(calls.len(), 2);
		assert!(calls[0].starts_with("screenshot"));
		assert!(calls[1].starts_with("remove"));
	}

	#[tokio::test]
	async fn finished_background_tasks_are_reaped() {
		let host = FakeHost::new();
		let saves = BackgroundSaves::default();

		for _ in 0..5 {
			let artifact = Arc::new(Artifact::new(
				"screenshot",
				Arc::new(ScreenshotRecording::new(host.clone())),
			));
			artifact.start(StartArgs::default()).await.unwrap();
			saves.schedule(artifact, None);
			for _ in 0..20 {
				tokio::task::yield_now().await;
			}
		}

		assert!(saves.pending() <= 1);
		saves.drain().await;
		assert_eq!(saves.pending(), 0);
		assert_eq!(host.calls().iter().filter(|c| c.starts_with("remove")).count(), 5);
	}
}
