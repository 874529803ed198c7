use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{BoxFuture, TransportParts, TransportReceiver, TransportSender};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to the app-side server.
///
/// Messages travel as JSON text frames. Binary frames are accepted on the
/// receiving side for peers that send UTF-8 JSON as bytes.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Opens a WebSocket to `url` and splits it into transport parts.
	pub async fn connect(url: &str) -> Result<TransportParts> {
		let (stream, _response) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;

		tracing::debug!(url, "WebSocket connected");

		let (sink, stream) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		Ok(TransportParts {
			sender: Box::new(WebSocketSender { sink }),
			receiver: Box::new(WebSocketReceiver { stream, message_tx }),
			message_rx,
		})
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl TransportSender for WebSocketSender {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(Message::Text(text))
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}

	fn close(&mut self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.sink
				.close()
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}
}

struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let WebSocketReceiver {
			mut stream,
			message_tx,
		} = *self;

		Box::pin(async move {
			while let Some(frame) = stream.next().await {
				let frame = frame.map_err(|e| Error::TransportError(e.to_string()))?;
				let parsed = match frame {
					Message::Text(text) => serde_json::from_str::<Value>(&text),
					Message::Binary(bytes) => serde_json::from_slice::<Value>(&bytes),
					Message::Close(_) => break,
					_ => continue,
				};

				match parsed {
					Ok(value) => {
						if message_tx.send(value).is_err() {
							break;
						}
					}
					Err(e) => tracing::warn!("Dropping non-JSON frame: {}", e),
				}
			}

			tracing::debug!("WebSocket stream ended");
			Ok(())
		})
	}
}
