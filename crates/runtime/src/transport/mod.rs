//! Message transports for the tester/app channel.
//!
//! A transport is split into three parts so the [`Connection`](crate::connection::Connection)
//! can drive reading and writing from separate tasks:
//!
//! - a [`TransportSender`] that writes JSON messages to the peer
//! - a [`TransportReceiver`] that pumps inbound messages until the peer goes away
//! - the receiving end of the channel the receiver pumps into
//!
//! Two implementations exist: [`WebSocketTransport`] for the real app and
//! [`ChannelTransport`], an in-memory pair whose other end ([`ChannelPeer`])
//! plays the app in tests.

mod channel;
mod websocket;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

pub use channel::{ChannelPeer, ChannelTransport};
pub use websocket::WebSocketTransport;

use crate::error::Result;

/// Boxed future returned by transport halves.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Writing half of a transport.
pub trait TransportSender: Send {
	/// Sends one JSON message to the peer.
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;

	/// Closes the outgoing direction. Further sends fail.
	fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Reading half of a transport.
pub trait TransportReceiver: Send {
	/// Forwards inbound messages until the peer closes or the stream fails.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// The pieces a [`Connection`](crate::connection::Connection) is built from.
pub struct TransportParts {
	pub sender: Box<dyn TransportSender>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}
