//! Device lifecycle.
//!
//! ```text
//! Free ─acquire─▶ Acquiring ─┬─▶ ColdBooting ──┬─▶ BootPolling ─▶ Ready ─launch─▶ InUse
//!   ▲                        └─▶ WarmAttaching ┘                    │               │
//!   └──────────────── release / shutdown (ShuttingDown) ◀───────────┴───────────────┘
//! ```
//!
//! A [`Device`] owns one registry allocation at a time. Backend specifics
//! live behind [`DeviceBackend`]; lifecycle notifications go out through the
//! device's [`EventBus`].

mod android;
mod attached;
mod backend;
mod emulator;
mod events;
mod registry;
mod simulator;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

pub use android::{AndroidArtifactHost, AndroidOps};
pub use attached::AttachedBackend;
pub use backend::{
	BackendType, DeviceBackend, DevicePool, LanguageAndLocale, LaunchArgs, PermissionAction, Permissions,
	create_backend,
};
pub use emulator::EmulatorBackend;
pub use events::{DeviceEvent, EventBus, ListenerId, Subscription};
pub use registry::DeviceRegistry;
pub use simulator::{SimulatorArtifactHost, SimulatorBackend};

use crate::artifacts::ArtifactHost;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, retry};

/// Where a [`Device`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
	Free,
	Acquiring,
	ColdBooting,
	WarmAttaching,
	BootPolling,
	Ready,
	InUse,
	ShuttingDown,
}

#[derive(Debug)]
struct DeviceInner {
	state: DeviceState,
	/// Registry id of the allocated device.
	id: Option<String>,
	/// Backend handle once booted.
	handle: Option<String>,
}

/// A device allocated from the registry and driven through a backend.
pub struct Device {
	backend: Arc<dyn DeviceBackend>,
	registry: DeviceRegistry,
	events: EventBus,
	boot_policy: RetryPolicy,
	inner: Mutex<DeviceInner>,
}

impl std::fmt::Debug for Device {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Device")
			.field("backend", &self.backend.backend_type())
			.field("inner", &*self.inner.lock())
			.finish()
	}
}

impl Device {
	pub fn new(backend: Arc<dyn DeviceBackend>, registry: DeviceRegistry) -> Self {
		Self {
			backend,
			registry,
			events: EventBus::new(),
			boot_policy: RetryPolicy::BOOT,
			inner: Mutex::new(DeviceInner {
				state: DeviceState::Free,
				id: None,
				handle: None,
			}),
		}
	}

	pub fn with_boot_policy(mut self, policy: RetryPolicy) -> Self {
		self.boot_policy = policy;
		self
	}

	pub fn backend_type(&self) -> BackendType {
		self.backend.backend_type()
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	pub fn state(&self) -> DeviceState {
		self.inner.lock().state
	}

	/// Registry id of the allocated device.
	pub fn id(&self) -> Option<String> {
		self.inner.lock().id.clone()
	}

	/// Backend handle of the booted device.
	pub fn handle(&self) -> Option<String> {
		self.inner.lock().handle.clone()
	}

	/// Capture primitives of the booted device.
	pub fn artifact_host(&self) -> Option<Arc<dyn ArtifactHost>> {
		self.handle().map(|handle| self.backend.artifact_host(&handle))
	}

	fn set_state(&self, state: DeviceState) {
		let mut inner = self.inner.lock();
		tracing::debug!(from = ?inner.state, to = ?state, "device state");
		inner.state = state;
	}

	/// The handle, if the device is `Ready` or `InUse`.
	fn usable_handle(&self, to: DeviceState) -> Result<String> {
		let inner = self.inner.lock();
		match (&inner.state, &inner.handle) {
			(DeviceState::Ready | DeviceState::InUse, Some(handle)) => Ok(handle.clone()),
			_ => Err(Error::InvalidDeviceTransition {
				from: inner.state,
				to,
			}),
		}
	}

	/// Allocates a device matching `name`, boots it if needed and waits until
	/// it is ready. Returns the backend handle.
	///
	/// # Errors
	///
	/// - [`Error::InvalidDeviceTransition`] unless the device is `Free`
	/// - [`Error::BootTimeout`] if boot never completes within the boot policy
	///
	/// The allocation is returned to the registry on failure.
	pub async fn acquire(&self, name: &str) -> Result<String> {
		{
			let mut inner = self.inner.lock();
			if inner.state != DeviceState::Free {
				return Err(Error::InvalidDeviceTransition {
					from: inner.state,
					to: DeviceState::Acquiring,
				});
			}
			inner.state = DeviceState::Acquiring;
		}

		let device_id = match self.registry.get_device(self.backend.as_ref(), name).await {
			Ok(id) => id,
			Err(e) => {
				self.set_state(DeviceState::Free);
				return Err(e);
			}
		};
		self.inner.lock().id = Some(device_id.clone());
		tracing::info!(device_id = %device_id, backend = %self.backend_type(), "Device allocated");

		match self.boot(&device_id).await {
			Ok(handle) => Ok(handle),
			Err(e) => {
				tracing::error!(device_id = %device_id, "Device failed to start: {}", e);
				if let Err(free_error) = self.registry.free_device(&device_id).await {
					tracing::warn!(device_id = %device_id, "Could not free device: {}", free_error);
				}
				let mut inner = self.inner.lock();
				inner.state = DeviceState::Free;
				inner.id = None;
				inner.handle = None;
				Err(e)
			}
		}
	}

	async fn boot(&self, device_id: &str) -> Result<String> {
		let cold_boot = match self.backend.running_handle(device_id).await? {
			Some(_) => {
				self.set_state(DeviceState::WarmAttaching);
				false
			}
			None => {
				self.set_state(DeviceState::ColdBooting);
				tracing::info!(device_id, "Cold booting device");
				self.backend.cold_boot(device_id).await?;
				true
			}
		};

		self.set_state(DeviceState::BootPolling);
		let handle = self.wait_for_boot(device_id).await?;
		self.backend.prepare(&handle).await?;

		{
			let mut inner = self.inner.lock();
			inner.handle = Some(handle.clone());
			inner.state = DeviceState::Ready;
		}
		tracing::info!(device_id, handle = %handle, cold_boot, "Device ready");
		self.events
			.emit(DeviceEvent::BootDevice {
				device_id: handle.clone(),
				cold_boot,
			})
			.await;
		Ok(handle)
	}

	async fn wait_for_boot(&self, device_id: &str) -> Result<String> {
		let policy = self.boot_policy;
		let mut attempt = 0;
		let probed = retry(policy, || {
			attempt += 1;
			let current = attempt;
			async move {
				match self.backend.probe_boot(device_id).await {
					Ok(Some(handle)) => Ok(handle),
					Ok(None) => {
						tracing::debug!(device_id, attempt = current, "Device has not finished booting");
						Err(None)
					}
					Err(e) => {
						tracing::debug!(device_id, attempt = current, "Boot probe failed: {}", e);
						Err(Some(e))
					}
				}
			}
		})
		.await;

		probed.map_err(|_| Error::BootTimeout {
			device_id: device_id.to_string(),
			attempts: policy.max_attempts.max(1),
		})
	}

	pub async fn install_app(&self, binary: &Path, test_binary: Option<&Path>) -> Result<()> {
		let handle = self.usable_handle(DeviceState::InUse)?;
		tracing::info!(handle = %handle, binary = %binary.display(), "Installing app");
		self.backend.install_app(&handle, binary, test_binary).await
	}

	pub async fn uninstall_app(&self, bundle_id: &str) -> Result<()> {
		let handle = self.usable_handle(DeviceState::InUse)?;
		self.backend.uninstall_app(&handle, bundle_id).await
	}

	/// Launches the app, announcing it with `BeforeLaunchApp` and then
	/// `LaunchApp` carrying the new pid.
	pub async fn launch_app(&self, bundle_id: &str, args: &LaunchArgs) -> Result<u32> {
		let handle = self.usable_handle(DeviceState::InUse)?;

		self.events
			.emit(DeviceEvent::BeforeLaunchApp {
				device_id: handle.clone(),
				bundle_id: bundle_id.to_string(),
			})
			.await;

		let pid = self.backend.launch_app(&handle, bundle_id, args).await?;
		self.set_state(DeviceState::InUse);
		tracing::info!(handle = %handle, bundle_id, pid, "App launched");

		self.events
			.emit(DeviceEvent::LaunchApp {
				device_id: handle,
				bundle_id: bundle_id.to_string(),
				pid,
			})
			.await;
		Ok(pid)
	}

	pub async fn terminate_app(&self, bundle_id: &str) -> Result<()> {
		let handle = self.usable_handle(DeviceState::Ready)?;
		self.backend.terminate_app(&handle, bundle_id).await
	}

	pub async fn send_to_home(&self) -> Result<()> {
		let handle = self.usable_handle(DeviceState::InUse)?;
		self.backend.send_to_home(&handle).await
	}

	pub async fn set_location(&self, latitude: f64, longitude: f64) -> Result<()> {
		let handle = self.usable_handle(DeviceState::InUse)?;
		self.backend.set_location(&handle, latitude, longitude).await
	}

	pub async fn set_permissions(&self, bundle_id: &str, permissions: &Permissions) -> Result<()> {
		let handle = self.usable_handle(DeviceState::InUse)?;
		self.backend.set_permissions(&handle, bundle_id, permissions).await
	}

	/// Wipes the device and boots it again; the app has to be reinstalled.
	pub async fn reset_content_and_settings(&self) -> Result<()> {
		let handle = self.usable_handle(DeviceState::Ready)?;
		self.events
			.emit(DeviceEvent::ShutdownDevice {
				device_id: handle.clone(),
			})
			.await;
		self.backend.reset_content_and_settings(&handle).await?;
		self.set_state(DeviceState::Ready);
		self.events
			.emit(DeviceEvent::BootDevice {
				device_id: handle,
				cold_boot: true,
			})
			.await;
		Ok(())
	}

	/// Returns the device to the registry, leaving it running.
	pub async fn release(&self) -> Result<()> {
		let device_id = {
			let mut inner = self.inner.lock();
			if inner.state == DeviceState::Free {
				return Ok(());
			}
			if !matches!(inner.state, DeviceState::Ready | DeviceState::InUse) {
				return Err(Error::InvalidDeviceTransition {
					from: inner.state,
					to: DeviceState::Free,
				});
			}
			inner.state = DeviceState::Free;
			inner.handle = None;
			inner.id.take()
		};

		if let Some(device_id) = device_id {
			self.registry.free_device(&device_id).await?;
			tracing::info!(device_id = %device_id, "Device released");
		}
		Ok(())
	}

	/// Stops the device and returns it to the registry. A no-op when nothing
	/// is allocated.
	pub async fn shutdown(&self) -> Result<()> {
		let (device_id, handle) = {
			let mut inner = self.inner.lock();
			match inner.state {
				DeviceState::Free | DeviceState::ShuttingDown => return Ok(()),
				DeviceState::Ready | DeviceState::InUse => {}
				from => {
					return Err(Error::InvalidDeviceTransition {
						from,
						to: DeviceState::ShuttingDown,
					});
				}
			}
			inner.state = DeviceState::ShuttingDown;
			(inner.id.clone(), inner.handle.clone())
		};

		let result = match &handle {
			Some(handle) => self.backend.shutdown(handle).await,
			None => Ok(()),
		};

		if let Some(handle) = handle {
			if result.is_ok() {
				tracing::info!(handle = %handle, "Device shut down");
				self.events
					.emit(DeviceEvent::ShutdownDevice { device_id: handle })
					.await;
			}
		}

		let freed = match &device_id {
			Some(id) => self.registry.free_device(id).await,
			None => Ok(()),
		};

		{
			let mut inner = self.inner.lock();
			inner.state = DeviceState::Free;
			inner.id = None;
			inner.handle = None;
		}
		result.and(freed)
	}

	/// Reads the bundle id from the app binary.
	pub async fn bundle_id_from_binary(&self, binary: &Path) -> Result<String> {
		self.backend.bundle_id_from_binary(binary).await
	}
}
