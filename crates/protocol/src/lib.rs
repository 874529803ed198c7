//! Wire types for the tester/app action protocol.
//!
//! Every message exchanged between the test runner ("tester") and the
//! instrumented application is an [`ActionEnvelope`]:
//!
//! ```text
//! {"type": "invoke", "params": {...}, "messageId": 3}
//! ```
//!
//! Requests carry a `messageId` allocated by the tester; the app echoes it on the
//! matching response. Unsolicited events (such as [`actions::APP_WILL_TERMINATE_WITH_ERROR`])
//! carry an id that never matches an outstanding request.
//!
//! # Main Types
//!
//! - [`ActionEnvelope`] - the unit of exchange on the channel
//! - [`actions`] - request, response and event type names
//! - [`CurrentStatus`] - idle/busy report used for synchronization
//! - [`FailureDetails`], [`CrashDetails`] - failure payloads

pub mod actions;
mod envelope;
mod payloads;

pub use envelope::{ActionEnvelope, MessageId};
pub use payloads::{
	BusyResource, CleanupParams, CrashDetails, CurrentStatus, FailureDetails, IdleState,
	LoginParams, TESTER_ROLE,
};
