//! Tester-side action client.
//!
//! [`Client`] owns one [`Connection`] to the instrumented app and exposes the
//! actions a test run needs: the login handshake, invocations, idle
//! synchronization and cleanup.
//!
//! # Slow invocations
//!
//! When [`ClientConfig::slow_invocation_threshold`] is set, [`Client::execute`]
//! asks the app for its `currentStatus` every time the threshold elapses while
//! the invocation is still pending. Each report is logged and published on
//! [`Client::status_reports`]. The invocation itself is never cancelled, and the
//! watchdog goes quiet once the channel closes.

use std::sync::Arc;
use std::time::Duration;

use mdrive_protocol::{
	ActionEnvelope, BusyResource, CleanupParams, CurrentStatus, LoginParams, actions,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::{TransportParts, WebSocketTransport};

/// Capacity of the slow-invocation status broadcast.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Connection settings for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// WebSocket URL of the relay the app connects to.
	pub server: String,
	/// Session shared between tester and app.
	pub session_id: String,
	/// Period of the slow-invocation watchdog. `None` disables it.
	pub slow_invocation_threshold: Option<Duration>,
}

impl ClientConfig {
	pub fn new(server: impl Into<String>, session_id: impl Into<String>) -> Self {
		Self {
			server: server.into(),
			session_id: session_id.into(),
			slow_invocation_threshold: None,
		}
	}

	pub fn with_slow_invocation_threshold(mut self, threshold: Duration) -> Self {
		self.slow_invocation_threshold = Some(threshold);
		self
	}
}

/// Client for the tester/app action protocol.
pub struct Client {
	config: ClientConfig,
	connection: Mutex<Option<Arc<Connection>>>,
	run_handle: Mutex<Option<JoinHandle<Result<()>>>>,
	status_tx: broadcast::Sender<CurrentStatus>,
}

impl Client {
	pub fn new(config: ClientConfig) -> Self {
		let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
		Self {
			config,
			connection: Mutex::new(None),
			run_handle: Mutex::new(None),
			status_tx,
		}
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Opens the WebSocket to the configured server and logs in.
	///
	/// # Errors
	///
	/// Returns [`Error::ConnectionFailed`] if the socket cannot be opened or the
	/// app does not answer `login` with `loginSuccess`.
	pub async fn connect(&self) -> Result<()> {
		tracing::debug!(server = %self.config.server, "Connecting to app");
		let parts = WebSocketTransport::connect(&self.config.server).await?;
		self.connect_with(parts).await
	}

	/// Logs in over an already opened transport.
	pub async fn connect_with(&self, parts: TransportParts) -> Result<()> {
		if self.is_connected() {
			return Err(Error::ProtocolError("client is already connected".to_string()));
		}

		let connection = Arc::new(Connection::new(parts));
		let runner = Arc::clone(&connection);
		let handle = tokio::spawn(async move { runner.run().await });

		*self.connection.lock() = Some(Arc::clone(&connection));
		*self.run_handle.lock() = Some(handle);

		let login = serde_json::to_value(LoginParams::tester(&self.config.session_id))?;
		match connection
			.send(actions::LOGIN, login, &[actions::LOGIN_SUCCESS])
			.await
		{
			Ok(_) => {
				tracing::debug!(session_id = %self.config.session_id, "Logged in");
				Ok(())
			}
			Err(e) => {
				connection.close();
				self.connection.lock().take();
				if let Some(handle) = self.run_handle.lock().take() {
					handle.abort();
				}
				Err(match e {
					Error::ConnectionFailed(_) => e,
					other => Error::ConnectionFailed(format!("login rejected: {other}")),
				})
			}
		}
	}

	/// Returns `true` while a logged-in channel is open.
	pub fn is_connected(&self) -> bool {
		self.connection
			.lock()
			.as_ref()
			.is_some_and(|c| c.is_open())
	}

	fn connection(&self) -> Result<Arc<Connection>> {
		self.connection.lock().clone().ok_or(Error::NotConnected)
	}

	/// Sends an arbitrary action and waits for one of the `expected` response types.
	pub async fn send_action(
		&self,
		kind: &str,
		params: Value,
		expected: &[&str],
	) -> Result<ActionEnvelope> {
		self.connection()?.send(kind, params, expected).await
	}

	/// Runs an invocation on the app and returns the `invokeResult` params.
	///
	/// The invocation descriptor is passed through unchanged.
	///
	/// # Errors
	///
	/// - [`Error::TestFailed`] when the app reports an assertion failure
	/// - [`Error::RemoteExecution`] when the invocation itself broke
	pub async fn execute(&self, invocation: Value) -> Result<Value> {
		let connection = self.connection()?;
		let invoke = connection.send(actions::INVOKE, invocation, &[actions::INVOKE_RESULT]);

		let Some(threshold) = self.config.slow_invocation_threshold else {
			return invoke.await.map(|response| response.params);
		};

		tokio::pin!(invoke);
		let mut watching = true;

		loop {
			if !watching {
				return invoke.await.map(|response| response.params);
			}

			tokio::select! {
				result = &mut invoke => return result.map(|response| response.params),
				_ = tokio::time::sleep(threshold) => {
					if !connection.is_open() {
						watching = false;
						continue;
					}
					tokio::select! {
						result = &mut invoke => return result.map(|response| response.params),
						status = query_status(connection.as_ref()) => match status {
							Ok(status) => self.report_slow_invocation(status),
							Err(e) if e.is_channel_closed() => watching = false,
							Err(e) => tracing::debug!("Status query during slow invocation failed: {}", e),
						},
					}
				}
			}
		}
	}

	fn report_slow_invocation(&self, status: CurrentStatus) {
		tracing::warn!(status = %status.describe(), "Invocation is taking long, app status");
		let _ = self.status_tx.send(status);
	}

	/// Subscribes to the status reports of the slow-invocation watchdog.
	pub fn status_reports(&self) -> broadcast::Receiver<CurrentStatus> {
		self.status_tx.subscribe()
	}

	/// Asks the app whether it is idle and what keeps it busy.
	pub async fn current_status(&self) -> Result<CurrentStatus> {
		let connection = self.connection()?;
		query_status(connection.as_ref()).await
	}

	/// Waits for the app to answer `isReady` with `ready`.
	pub async fn wait_until_ready(&self) -> Result<()> {
		self.send_action(actions::IS_READY, json!({}), &[actions::READY])
			.await
			.map(|_| ())
	}

	/// Returns immediately if the app is idle, otherwise waits until it is ready.
	///
	/// Returns the resources that were busy when the status was taken; empty if
	/// the app was idle.
	pub async fn wait_until_idle(&self) -> Result<Vec<BusyResource>> {
		let status = self.current_status().await?;
		if status.is_idle() {
			return Ok(Vec::new());
		}

		tracing::info!(status = %status.describe(), "Waiting for app to become idle");
		self.wait_until_ready().await?;
		Ok(status.resources)
	}

	pub async fn reload_react_native(&self) -> Result<()> {
		self.send_action(actions::RELOAD_REACT_NATIVE, json!({}), &[actions::READY])
			.await
			.map(|_| ())
	}

	/// Delivers a URL, notification or user activity to the running app.
	pub async fn deliver_payload(&self, payload: Value) -> Result<()> {
		self.send_action(
			actions::DELIVER_PAYLOAD,
			payload,
			&[actions::DELIVER_PAYLOAD_DONE],
		)
		.await
		.map(|_| ())
	}

	pub async fn shake(&self) -> Result<()> {
		self.send_action(actions::SHAKE, json!({}), &[actions::SHAKE_DEVICE_DONE])
			.await
			.map(|_| ())
	}

	pub async fn wait_for_active(&self) -> Result<()> {
		self.send_action(
			actions::WAIT_FOR_ACTIVE,
			json!({}),
			&[actions::WAIT_FOR_ACTIVE_DONE],
		)
		.await
		.map(|_| ())
	}

	pub async fn wait_for_background(&self) -> Result<()> {
		self.send_action(
			actions::WAIT_FOR_BACKGROUND,
			json!({}),
			&[actions::WAIT_FOR_BACKGROUND_DONE],
		)
		.await
		.map(|_| ())
	}

	/// Returns and clears the crash the app reported, if any.
	pub fn take_pending_crash(&self) -> Option<String> {
		self.connection
			.lock()
			.as_ref()
			.and_then(|c| c.take_pending_crash())
	}

	/// Tells the app to clean up, then closes the channel.
	///
	/// Does nothing if the client never connected or the channel already closed.
	pub async fn cleanup(&self) -> Result<()> {
		let Some(connection) = self.connection.lock().clone() else {
			return Ok(());
		};
		if !connection.is_open() {
			return Ok(());
		}

		let params = serde_json::to_value(CleanupParams { stop_runner: true })?;
		let result = connection
			.send(actions::CLEANUP, params, &[actions::CLEANUP_DONE])
			.await
			.map(|_| ());

		connection.close();
		let handle = self.run_handle.lock().take();
		if let Some(handle) = handle {
			match handle.await {
				Ok(Err(e)) => tracing::debug!("Connection loop ended with error: {}", e),
				Err(e) => tracing::debug!("Connection task failed: {}", e),
				Ok(Ok(())) => {}
			}
		}

		result
	}
}

async fn query_status(connection: &Connection) -> Result<CurrentStatus> {
	let response = connection
		.send(
			actions::CURRENT_STATUS,
			json!({}),
			&[actions::CURRENT_STATUS_RESULT],
		)
		.await?;
	Ok(response.params_as::<CurrentStatus>()?)
}

#[cfg(test)]
mod tests;
