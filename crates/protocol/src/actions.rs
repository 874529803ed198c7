//! Action type names.
//!
//! The set is open: the client can send any type string, these are the ones the
//! instrumented app understands today.

// Sent by the tester.
pub const LOGIN: &str = "login";
pub const INVOKE: &str = "invoke";
pub const CLEANUP: &str = "cleanup";
pub const CURRENT_STATUS: &str = "currentStatus";
pub const IS_READY: &str = "isReady";
pub const RELOAD_REACT_NATIVE: &str = "reactNativeReload";
pub const DELIVER_PAYLOAD: &str = "deliverPayload";
pub const SHAKE: &str = "shake";
pub const WAIT_FOR_ACTIVE: &str = "waitForActive";
pub const WAIT_FOR_BACKGROUND: &str = "waitForBackground";

// Sent by the app in response.
pub const LOGIN_SUCCESS: &str = "loginSuccess";
pub const READY: &str = "ready";
pub const INVOKE_RESULT: &str = "invokeResult";
pub const TEST_FAILED: &str = "testFailed";
pub const ERROR: &str = "error";
pub const CURRENT_STATUS_RESULT: &str = "currentStatusResult";
pub const CLEANUP_DONE: &str = "cleanupDone";
pub const DELIVER_PAYLOAD_DONE: &str = "deliverPayloadDone";
pub const SHAKE_DEVICE_DONE: &str = "shakeDeviceDone";
pub const WAIT_FOR_ACTIVE_DONE: &str = "waitForActiveDone";
pub const WAIT_FOR_BACKGROUND_DONE: &str = "waitForBackgroundDone";

/// Unsolicited event: the app is about to die because of an uncaught error.
pub const APP_WILL_TERMINATE_WITH_ERROR: &str = "AppWillTerminateWithError";
