//! Device lifecycle notifications.
//!
//! The driver publishes a fixed set of [`DeviceEvent`]s through an
//! [`EventBus`]. Listeners are awaited one after another, in subscription
//! order, before the emitting operation continues, so a listener reacting to
//! [`DeviceEvent::BeforeLaunchApp`] is done before the app starts.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

/// Events emitted by a [`super::Device`], in emission order per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DeviceEvent {
	/// The device finished booting. `cold_boot` is false when it was already running.
	BootDevice { device_id: String, cold_boot: bool },
	/// The app is about to be launched.
	BeforeLaunchApp { device_id: String, bundle_id: String },
	/// The app was launched as process `pid`.
	LaunchApp {
		device_id: String,
		bundle_id: String,
		pid: u32,
	},
	/// The device was shut down.
	ShutdownDevice { device_id: String },
}

impl DeviceEvent {
	pub fn name(&self) -> &'static str {
		match self {
			DeviceEvent::BootDevice { .. } => "bootDevice",
			DeviceEvent::BeforeLaunchApp { .. } => "beforeLaunchApp",
			DeviceEvent::LaunchApp { .. } => "launchApp",
			DeviceEvent::ShutdownDevice { .. } => "shutdownDevice",
		}
	}

	pub fn device_id(&self) -> &str {
		match self {
			DeviceEvent::BootDevice { device_id, .. }
			| DeviceEvent::BeforeLaunchApp { device_id, .. }
			| DeviceEvent::LaunchApp { device_id, .. }
			| DeviceEvent::ShutdownDevice { device_id } => device_id,
		}
	}
}

/// Identifier of a listener.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Boxed listener future.
pub type ListenerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Listener function: event → async `Result<()>`.
pub type ListenerFn = Arc<dyn Fn(DeviceEvent) -> ListenerFuture + Send + Sync>;

type ListenerMap = Arc<Mutex<IndexMap<ListenerId, ListenerFn>>>;

/// Ordered publish/subscribe channel for [`DeviceEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
	listeners: ListenerMap,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `listener`. It stays registered until the returned
	/// [`Subscription`] is dropped.
	pub fn subscribe<F, Fut>(&self, listener: F) -> Subscription
	where
		F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst);
		let listener: ListenerFn = Arc::new(move |event| Box::pin(listener(event)));
		self.listeners.lock().insert(id, listener);
		Subscription {
			id,
			listeners: Some(Arc::downgrade(&self.listeners)),
		}
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}

	/// Delivers `event` to every listener in subscription order.
	///
	/// Listener failures are logged and do not stop delivery.
	pub async fn emit(&self, event: DeviceEvent) {
		let listeners: Vec<(ListenerId, ListenerFn)> = self
			.listeners
			.lock()
			.iter()
			.map(|(id, f)| (*id, Arc::clone(f)))
			.collect();

		tracing::debug!(event = event.name(), device_id = %event.device_id(), listeners = listeners.len(), "emit");
		for (id, listener) in listeners {
			if let Err(e) = listener(event.clone()).await {
				tracing::warn!(event = event.name(), listener = id, "Device event listener failed: {}", e);
			}
		}
	}
}

impl std::fmt::Debug for EventBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventBus")
			.field("listeners", &self.listener_count())
			.finish()
	}
}

/// RAII handle that removes a listener on drop.
///
/// Holds a weak reference to the bus, so it may outlive it.
pub struct Subscription {
	id: ListenerId,
	listeners: Option<Weak<Mutex<IndexMap<ListenerId, ListenerFn>>>>,
}

impl Subscription {
	pub fn id(&self) -> ListenerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		self.remove();
	}

	fn remove(&mut self) {
		if let Some(map) = self.listeners.take().and_then(|weak| weak.upgrade()) {
			map.lock().shift_remove(&self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.remove();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.listeners.is_some())
			.finish()
	}
}
