//! The test harness facade.
//!
//! A [`Session`] ties one run together: the app channel ([`Client`]), one
//! [`Device`] taken from the shared registry, and the [`ArtifactsManager`]
//! listening to both test and device events.
//!
//! ```ignore
//! let session = Session::new(RunConfig::from_file(path)?, Arc::new(SystemCommandRunner))?;
//! session.init().await?;
//! session.launch_app(&LaunchArgs::new()).await?;
//!
//! session.before_each(&json!({"title": "logs in", "fullName": "Login logs in", "status": "running"})).await?;
//! // ... drive the app through session.client() ...
//! session.after_each(&json!({"title": "logs in", "fullName": "Login logs in", "status": "passed"})).await?;
//!
//! session.cleanup().await?;
//! ```

use std::sync::Arc;

use mdrive_runtime::{Client, ClientConfig, TransportParts};
use parking_lot::Mutex;
use serde_json::Value;

use crate::artifacts::ArtifactsManager;
use crate::config::RunConfig;
use crate::device::{
	BackendType, Device, DeviceBackend, DeviceRegistry, LaunchArgs, Subscription, create_backend,
};
use crate::error::{Error, Result};
use crate::exec::CommandRunner;

/// Launch argument carrying the relay URL to the app.
pub const SERVER_ARG: &str = "detoxServer";
/// Launch argument carrying the session id to the app.
pub const SESSION_ID_ARG: &str = "detoxSessionId";

/// One test run against one device.
pub struct Session {
	config: RunConfig,
	client: Arc<Client>,
	device: Arc<Device>,
	artifacts: Arc<ArtifactsManager>,
	subscription: Mutex<Option<Subscription>>,
	bundle_id: Mutex<Option<String>>,
}

impl Session {
	/// Builds a session for the backend named in `config`.
	pub fn new(config: RunConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
		let backend = create_backend(&config.device, runner)?;
		Ok(Self::with_backend(config, backend))
	}

	pub fn with_backend(config: RunConfig, backend: Arc<dyn DeviceBackend>) -> Self {
		let registry = DeviceRegistry::new(&config.registry.lock_file);
		let device = Device::new(backend, registry).with_boot_policy(config.device.boot.policy());
		let artifacts = ArtifactsManager::from_config(&config);

		let mut client_config = ClientConfig::new(&config.session.server, &config.session.session_id);
		if let Some(threshold) = config.slow_invocation_threshold() {
			client_config = client_config.with_slow_invocation_threshold(threshold);
		}

		Self {
			config,
			client: Arc::new(Client::new(client_config)),
			device: Arc::new(device),
			artifacts: Arc::new(artifacts),
			subscription: Mutex::new(None),
			bundle_id: Mutex::new(None),
		}
	}

	pub fn config(&self) -> &RunConfig {
		&self.config
	}

	pub fn client(&self) -> &Arc<Client> {
		&self.client
	}

	pub fn device(&self) -> &Arc<Device> {
		&self.device
	}

	pub fn artifacts(&self) -> &Arc<ArtifactsManager> {
		&self.artifacts
	}

	/// Bundle id of the app under test, known after [`Session::init`].
	pub fn bundle_id(&self) -> Option<String> {
		self.bundle_id.lock().clone()
	}

	/// Connects to the configured relay, then readies the device.
	pub async fn init(&self) -> Result<()> {
		self.artifacts.on_before_all().await;
		self.client.connect().await?;
		self.prepare_device().await
	}

	/// Like [`Session::init`], over an already opened transport.
	pub async fn init_with(&self, parts: TransportParts) -> Result<()> {
		self.artifacts.on_before_all().await;
		self.client.connect_with(parts).await?;
		self.prepare_device().await
	}

	async fn prepare_device(&self) -> Result<()> {
		// Subscribed before acquiring so that plugins see the boot.
		let artifacts = Arc::clone(&self.artifacts);
		let subscription = self.device.events().subscribe(move |event| {
			let artifacts = Arc::clone(&artifacts);
			async move {
				artifacts.on_device_event(&event).await;
				Ok(())
			}
		});
		*self.subscription.lock() = Some(subscription);

		self.device.acquire(&self.config.device.name).await?;
		if let Some(host) = self.device.artifact_host() {
			self.artifacts.attach(host);
		}

		let bundle_id = match &self.config.device.bundle_id {
			Some(id) => id.clone(),
			None => {
				self.device
					.bundle_id_from_binary(&self.config.device.binary_path)
					.await?
			}
		};
		*self.bundle_id.lock() = Some(bundle_id.clone());

		if self.config.reuse {
			tracing::info!(bundle_id = %bundle_id, "Reusing installed app");
		} else {
			if let Err(e) = self.device.uninstall_app(&bundle_id).await {
				tracing::debug!(bundle_id = %bundle_id, "Uninstall before install failed: {}", e);
			}
			self.device
				.install_app(
					&self.config.device.binary_path,
					self.config.device.test_binary_path.as_deref(),
				)
				.await?;
		}

		let permissions = &self.config.device.permissions;
		if !permissions.is_empty() {
			self.device.set_permissions(&bundle_id, permissions).await?;
		}
		Ok(())
	}

	fn require_bundle_id(&self) -> Result<String> {
		self.bundle_id()
			.ok_or_else(|| Error::Config("session is not initialized".to_string()))
	}

	/// Launches the app with the session arguments added to `args` and waits
	/// until it reports ready. Returns the app's pid.
	pub async fn launch_app(&self, args: &LaunchArgs) -> Result<u32> {
		let bundle_id = self.require_bundle_id()?;

		let mut args = args.clone();
		if let Some(language_and_locale) = &self.config.device.language_and_locale {
			if self.device.backend_type() == BackendType::Simulator {
				language_and_locale.apply(&mut args);
			} else {
				tracing::debug!(backend = %self.device.backend_type(), "Language and locale apply to simulators only");
			}
		}
		args.insert(SERVER_ARG.to_string(), self.config.session.server.clone());
		args.insert(SESSION_ID_ARG.to_string(), self.config.session.session_id.clone());

		let pid = self.device.launch_app(&bundle_id, &args).await?;
		self.client.wait_until_ready().await?;
		Ok(pid)
	}

	pub async fn terminate_app(&self) -> Result<()> {
		let bundle_id = self.require_bundle_id()?;
		self.device.terminate_app(&bundle_id).await
	}

	/// Relaunches a fresh instance of the app.
	pub async fn relaunch_app(&self) -> Result<u32> {
		if let Err(e) = self.terminate_app().await {
			tracing::debug!("Terminating app before relaunch failed: {}", e);
		}
		self.launch_app(&LaunchArgs::new()).await
	}

	pub async fn before_each(&self, test: &Value) -> Result<()> {
		self.artifacts.on_before_each(test).await
	}

	/// Finishes a test. A crash the app reported meanwhile is logged and the
	/// app relaunched for the next test.
	pub async fn after_each(&self, test: &Value) -> Result<()> {
		self.artifacts.on_after_each(test).await?;

		if let Some(details) = self.client.take_pending_crash() {
			let name = test
				.get("fullName")
				.and_then(Value::as_str)
				.unwrap_or_default();
			tracing::error!(test = name, "The app crashed during the test:\n{}", details);
			self.relaunch_app().await?;
		}
		Ok(())
	}

	/// Ends the run. Every step runs even if an earlier one failed; the first
	/// failure is returned. Safe to call before, or without, [`Session::init`].
	pub async fn cleanup(&self) -> Result<()> {
		let mut first_error = None;
		let mut keep = |step: &str, result: Result<()>| {
			if let Err(e) = result {
				tracing::warn!(step, "Cleanup step failed: {}", e);
				first_error.get_or_insert(e);
			}
		};

		self.artifacts.on_after_all().await;
		self.subscription.lock().take();
		self.artifacts.detach();

		keep("client", self.client.cleanup().await.map_err(Error::from));

		let device = if self.config.cleanup {
			self.device.shutdown().await
		} else {
			self.device.release().await
		};
		keep("device", device);

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}
