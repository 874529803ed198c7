//! mdrive runtime - the tester/app channel
//!
//! This crate provides the plumbing between the test runner and the
//! instrumented application:
//!
//! - **Transport**: JSON messages over WebSocket, or an in-memory channel for tests
//! - **Connection**: request/response correlation by `messageId`, crash events,
//!   rejection of everything pending when the channel closes
//! - **Client**: login handshake, invocations, idle synchronization, the
//!   slow-invocation watchdog and cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   mdrive    │  Devices, artifacts, session
//! └──────┬──────┘
//!        │ Client
//! ┌──────▼──────────┐
//! │ mdrive-runtime  │  This crate
//! │  ┌────────┐     │
//! │  │ Client │     │  Actions and synchronization
//! │  └────────┘     │
//! │  ┌────────┐     │
//! │  │ Conn   │     │  messageId correlation
//! │  └────────┘     │
//! │  ┌────────┐     │
//! │  │ Trans  │     │  WebSocket / channel transport
//! │  └────────┘     │
//! └─────────────────┘
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use connection::Connection;
pub use error::{Error, Result};
pub use transport::{
	ChannelPeer, ChannelTransport, TransportParts, TransportReceiver, TransportSender,
	WebSocketTransport,
};
