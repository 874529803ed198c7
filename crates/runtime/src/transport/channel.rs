use mdrive_protocol::{ActionEnvelope, MessageId};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{BoxFuture, TransportParts, TransportReceiver, TransportSender};
use crate::error::{Error, Result};

/// In-memory transport.
///
/// [`ChannelTransport::pair`] returns the client-side [`TransportParts`] and the
/// [`ChannelPeer`] that stands in for the app.
pub struct ChannelTransport;

impl ChannelTransport {
	pub fn pair() -> (TransportParts, ChannelPeer) {
		let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
		let (from_peer_tx, from_peer_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		let parts = TransportParts {
			sender: Box::new(ChannelSender {
				tx: Some(to_peer_tx),
			}),
			receiver: Box::new(ChannelReceiver {
				rx: from_peer_rx,
				message_tx,
			}),
			message_rx,
		};

		let peer = ChannelPeer {
			inbound: to_peer_rx,
			outbound: Some(from_peer_tx),
		};

		(parts, peer)
	}
}

struct ChannelSender {
	tx: Option<mpsc::UnboundedSender<Value>>,
}

impl TransportSender for ChannelSender {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		let result = match &self.tx {
			Some(tx) => tx.send(message).map_err(|_| Error::ChannelClosed),
			None => Err(Error::ChannelClosed),
		};
		Box::pin(async move { result })
	}

	fn close(&mut self) -> BoxFuture<'_, Result<()>> {
		self.tx = None;
		Box::pin(async { Ok(()) })
	}
}

struct ChannelReceiver {
	rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for ChannelReceiver {
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let ChannelReceiver { mut rx, message_tx } = *self;
		Box::pin(async move {
			while let Some(message) = rx.recv().await {
				if message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

/// The app side of a [`ChannelTransport`].
pub struct ChannelPeer {
	inbound: mpsc::UnboundedReceiver<Value>,
	outbound: Option<mpsc::UnboundedSender<Value>>,
}

impl ChannelPeer {
	/// Next message the client sent, or `None` once the client closed its side.
	pub async fn recv(&mut self) -> Option<ActionEnvelope> {
		loop {
			let value = self.inbound.recv().await?;
			match serde_json::from_value(value) {
				Ok(envelope) => return Some(envelope),
				Err(e) => tracing::warn!("Peer received malformed envelope: {}", e),
			}
		}
	}

	/// Sends a raw JSON message to the client.
	pub fn push(&self, message: Value) -> Result<()> {
		match &self.outbound {
			Some(tx) => tx.send(message).map_err(|_| Error::ChannelClosed),
			None => Err(Error::ChannelClosed),
		}
	}

	/// Sends a response envelope correlated with `message_id`.
	pub fn reply(&self, kind: &str, params: Value, message_id: MessageId) -> Result<()> {
		let envelope = ActionEnvelope::new(kind, params).with_message_id(message_id);
		self.push(serde_json::to_value(envelope)?)
	}

	/// Drops the peer's sending side, which the client observes as a closed channel.
	pub fn hang_up(&mut self) {
		self.outbound = None;
	}
}
