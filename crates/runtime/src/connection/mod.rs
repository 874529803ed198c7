//! Request/response correlation over a transport.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with an action type, params and the
//!    response types it accepts
//! 2. Connection allocates the next message id and parks a oneshot sender in
//!    the pending map
//! 3. The envelope is queued for the writer task
//! 4. The dispatch loop receives an envelope from the transport
//! 5. The envelope is matched to the pending request by `messageId` only, never
//!    by arrival order, and classified against the accepted types
//! 6. The caller's future resolves or rejects, exactly once
//!
//! Unsolicited `AppWillTerminateWithError` events are kept as a pending crash.
//! When the channel closes every pending request rejects with
//! [`Error::ChannelClosed`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};

use mdrive_protocol::actions::{APP_WILL_TERMINATE_WITH_ERROR, ERROR, TEST_FAILED};
use mdrive_protocol::{ActionEnvelope, CrashDetails, FailureDetails, MessageId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::transport::{TransportParts, TransportReceiver, TransportSender};

/// A request waiting for its response.
struct PendingRequest {
	action: String,
	expected: Vec<String>,
	sender: oneshot::Sender<Result<ActionEnvelope>>,
}

/// Pending requests keyed by message id.
type PendingMap = Arc<Mutex<HashMap<MessageId, PendingRequest>>>;

/// Work items for the writer task.
enum Outbound {
	Message(Value),
	Close,
}

/// RAII guard removing the pending entry when a request future is dropped early.
struct CancelGuard {
	id: MessageId,
	pending: PendingMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: MessageId, pending: PendingMap) -> Self {
		Self {
			id,
			pending,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.pending.lock().remove(&self.id).is_some() {
			tracing::debug!(message_id = self.id, "CancelGuard: removed orphaned request");
		}
	}
}

/// Future returned by [`Connection::send`].
struct ResponseFuture {
	rx: oneshot::Receiver<Result<ActionEnvelope>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<ActionEnvelope>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Correlating connection to the instrumented app.
pub struct Connection {
	/// Last allocated message id; the first request gets 1.
	last_id: AtomicI64,
	pending: PendingMap,
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	/// Transport halves and queues, taken once by [`Connection::run`].
	transport_sender: Mutex<Option<Box<dyn TransportSender>>>,
	transport_receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
	pending_crash: Mutex<Option<String>>,
	closed: watch::Sender<bool>,
}

impl Connection {
	/// Creates a connection over the given transport. Nothing is read or
	/// written until [`Connection::run`] is driven.
	pub fn new(parts: TransportParts) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (closed, _) = watch::channel(false);

		Self {
			last_id: AtomicI64::new(0),
			pending: Arc::new(Mutex::new(HashMap::new())),
			outbound_tx,
			transport_sender: Mutex::new(Some(sender)),
			transport_receiver: Mutex::new(Some(receiver)),
			message_rx: Mutex::new(Some(message_rx)),
			outbound_rx: Mutex::new(Some(outbound_rx)),
			pending_crash: Mutex::new(None),
			closed,
		}
	}

	/// Sends `kind` with `params` and waits for the correlated response.
	///
	/// Resolves with the response envelope if its type is in `expected`.
	///
	/// # Errors
	///
	/// - [`Error::TestFailed`] for a `testFailed` response
	/// - [`Error::RemoteExecution`] for an `error` response
	/// - [`Error::ProtocolMismatch`] for any other unexpected type
	/// - [`Error::ChannelClosed`] if the channel closes first
	pub async fn send(&self, kind: &str, params: Value, expected: &[&str]) -> Result<ActionEnvelope> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();

		self.pending.lock().insert(
			id,
			PendingRequest {
				action: kind.to_string(),
				expected: expected.iter().map(|t| t.to_string()).collect(),
				sender: tx,
			},
		);
		let guard = CancelGuard::new(id, Arc::clone(&self.pending));

		// A close that drained the map before our insert would never reject us.
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let envelope = ActionEnvelope::new(kind, params).with_message_id(id);
		let value = serde_json::to_value(&envelope)?;
		tracing::debug!(message_id = id, action = kind, "Sending action");

		if self.outbound_tx.send(Outbound::Message(value)).is_err() {
			tracing::error!("Failed to queue action: writer task is gone");
			return Err(Error::ChannelClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Runs the read, write and dispatch loops until the channel closes.
	///
	/// # Errors
	///
	/// Returns [`Error::ProtocolError`] if called more than once.
	pub async fn run(self: &Arc<Self>) -> Result<()> {
		let (receiver, mut sender, mut message_rx, mut outbound_rx) = {
			let taken = (
				self.transport_receiver.lock().take(),
				self.transport_sender.lock().take(),
				self.message_rx.lock().take(),
				self.outbound_rx.lock().take(),
			);
			match taken {
				(Some(r), Some(s), Some(m), Some(o)) => (r, s, m, o),
				_ => return Err(Error::ProtocolError("run() can only be called once".to_string())),
			}
		};

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::error!("Transport read error: {}", e);
			}
		});

		let writer_handle = tokio::spawn(async move {
			while let Some(item) = outbound_rx.recv().await {
				match item {
					Outbound::Message(message) => {
						if let Err(e) = sender.send(message).await {
							tracing::error!("Transport write error: {}", e);
							break;
						}
					}
					Outbound::Close => {
						if let Err(e) = sender.close().await {
							tracing::debug!("Transport close error: {}", e);
						}
						break;
					}
				}
			}
		});

		let mut closed_rx = self.closed.subscribe();
		loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => self.dispatch_value(value),
					None => break,
				},
				_ = closed_rx.wait_for(|closed| *closed) => break,
			}
		}

		self.mark_closed();
		let _ = self.outbound_tx.send(Outbound::Close);
		let _ = writer_handle.await;
		reader_handle.abort();

		Ok(())
	}

	/// Dispatches one raw inbound message.
	fn dispatch_value(&self, value: Value) {
		match serde_json::from_value::<ActionEnvelope>(value) {
			Ok(envelope) => self.dispatch(envelope),
			Err(e) => tracing::warn!("Dropping message without a valid envelope: {}", e),
		}
	}

	fn dispatch(&self, envelope: ActionEnvelope) {
		if envelope.is(APP_WILL_TERMINATE_WITH_ERROR) {
			let details = envelope
				.params_as::<CrashDetails>()
				.map(|c| c.error_details)
				.unwrap_or_else(|_| envelope.params.to_string());
			tracing::warn!("App reported it will terminate with error: {}", details);
			*self.pending_crash.lock() = Some(details);
			return;
		}

		let Some(id) = envelope.message_id else {
			tracing::debug!(kind = %envelope.kind, "Ignoring uncorrelated event");
			return;
		};

		let Some(request) = self.pending.lock().remove(&id) else {
			tracing::warn!(
				message_id = id,
				kind = %envelope.kind,
				"Response for unknown or already resolved request"
			);
			return;
		};

		tracing::debug!(
			message_id = id,
			action = %request.action,
			kind = %envelope.kind,
			"Received response"
		);

		let outcome = classify(&request.expected, envelope);
		let _ = request.sender.send(outcome);
	}

	/// Closes the channel. Pending requests reject with [`Error::ChannelClosed`].
	pub fn close(&self) {
		if self.is_closed() {
			return;
		}
		let _ = self.outbound_tx.send(Outbound::Close);
		self.mark_closed();
	}

	fn mark_closed(&self) {
		if self.closed.send_replace(true) {
			return;
		}

		let drained: Vec<(MessageId, PendingRequest)> = self.pending.lock().drain().collect();
		if !drained.is_empty() {
			tracing::debug!(count = drained.len(), "Rejecting pending requests on close");
		}
		for (_, request) in drained {
			let _ = request.sender.send(Err(Error::ChannelClosed));
		}
		tracing::debug!("Connection closed");
	}

	/// Returns `true` until the channel has closed.
	pub fn is_open(&self) -> bool {
		!self.is_closed()
	}

	fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Resolves once the channel has closed.
	pub async fn closed(&self) {
		let mut rx = self.closed.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}

	/// Returns and clears the crash reported by the app, if any.
	pub fn take_pending_crash(&self) -> Option<String> {
		self.pending_crash.lock().take()
	}

	/// Number of requests still waiting for a response.
	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}
}

/// Maps a correlated response onto the caller's outcome.
fn classify(expected: &[String], envelope: ActionEnvelope) -> Result<ActionEnvelope> {
	if expected.iter().any(|t| envelope.is(t)) {
		return Ok(envelope);
	}

	match envelope.kind.as_str() {
		TEST_FAILED => Err(Error::TestFailed {
			details: failure_details(&envelope.params),
		}),
		ERROR => Err(Error::RemoteExecution {
			details: failure_details(&envelope.params),
		}),
		_ => Err(Error::ProtocolMismatch {
			expected: expected.to_vec(),
			actual: envelope.kind,
			params: envelope.params,
		}),
	}
}

fn failure_details(params: &Value) -> String {
	match serde_json::from_value::<FailureDetails>(params.clone()) {
		Ok(failure) if !failure.details.is_empty() => failure.details,
		_ => params.to_string(),
	}
}

#[cfg(test)]
mod tests;
