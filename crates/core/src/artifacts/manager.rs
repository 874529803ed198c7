use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::{
	ArtifactHost, ArtifactPathBuilder, ArtifactPlugin, PluginContext, TestSummary,
	TwoSnapshotsPerTestPlugin, WholeTestRecorderPlugin,
};
use crate::config::RunConfig;
use crate::device::DeviceEvent;
use crate::error::Result;

/// Fans test and device lifecycle events out to the artifact plugins.
///
/// Plugins run one after another in registration order. A failing plugin is
/// logged and skipped; artifacts never fail a test.
pub struct ArtifactsManager {
	plugins: Vec<Arc<dyn ArtifactPlugin>>,
	paths: Arc<ArtifactPathBuilder>,
	host: RwLock<Option<Arc<dyn ArtifactHost>>>,
}

impl ArtifactsManager {
	pub fn new(paths: ArtifactPathBuilder) -> Self {
		Self {
			plugins: Vec::new(),
			paths: Arc::new(paths),
			host: RwLock::new(None),
		}
	}

	/// Manager with the log, screenshot and video plugins configured in `config`.
	pub fn from_config(config: &RunConfig) -> Self {
		let root = config
			.artifacts
			.root_dir
			.clone()
			.unwrap_or_else(|| ArtifactPathBuilder::default_root(&config.configuration));
		let artifacts = &config.artifacts;

		Self::new(ArtifactPathBuilder::new(root))
			.with_plugin(WholeTestRecorderPlugin::logs(artifacts.record_logs))
			.with_plugin(TwoSnapshotsPerTestPlugin::new(artifacts.take_screenshots))
			.with_plugin(WholeTestRecorderPlugin::videos(artifacts.record_videos))
	}

	pub fn with_plugin(mut self, plugin: impl ArtifactPlugin + 'static) -> Self {
		self.plugins.push(Arc::new(plugin));
		self
	}

	pub fn paths(&self) -> &ArtifactPathBuilder {
		&self.paths
	}

	/// Binds the plugins to the capture primitives of the acquired device.
	pub fn attach(&self, host: Arc<dyn ArtifactHost>) {
		*self.host.write() = Some(host);
	}

	pub fn detach(&self) {
		self.host.write().take();
	}

	fn context(&self) -> PluginContext {
		PluginContext {
			host: self.host.read().clone(),
			paths: Arc::clone(&self.paths),
		}
	}

	pub async fn on_before_all(&self) {
		let ctx = self.context();
		for plugin in &self.plugins {
			report(plugin.as_ref(), "onBeforeAll", plugin.on_before_all(&ctx).await);
		}
	}

	/// # Errors
	///
	/// [`crate::Error::InvalidTestSummary`] if `test` is malformed; no plugin
	/// is called in that case.
	pub async fn on_before_each(&self, test: &Value) -> Result<()> {
		let test = TestSummary::parse(test)?;
		let ctx = self.context();
		for plugin in &self.plugins {
			report(plugin.as_ref(), "onBeforeEach", plugin.on_before_each(&ctx, &test).await);
		}
		Ok(())
	}

	/// # Errors
	///
	/// [`crate::Error::InvalidTestSummary`] if `test` is malformed; no plugin
	/// is called in that case.
	pub async fn on_after_each(&self, test: &Value) -> Result<()> {
		let test = TestSummary::parse(test)?;
		let ctx = self.context();
		for plugin in &self.plugins {
			report(plugin.as_ref(), "onAfterEach", plugin.on_after_each(&ctx, &test).await);
		}
		Ok(())
	}

	/// Waits for every pending save and discard.
	pub async fn on_after_all(&self) {
		let ctx = self.context();
		for plugin in &self.plugins {
			report(plugin.as_ref(), "onAfterAll", plugin.on_after_all(&ctx).await);
		}
	}

	pub async fn on_device_event(&self, event: &DeviceEvent) {
		let ctx = self.context();
		for plugin in &self.plugins {
			report(plugin.as_ref(), event.name(), plugin.on_device_event(&ctx, event).await);
		}
	}
}

fn report(plugin: &dyn ArtifactPlugin, hook: &str, result: Result<()>) {
	if let Err(e) = result {
		tracing::warn!(plugin = plugin.name(), hook, "Artifact plugin failed: {}", e);
	}
}
