//! mdrive: end-to-end test harness for mobile apps
//!
//! This crate drives the devices and collects the artifacts of a test run. The
//! app channel itself lives in `mdrive-runtime`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mdrive::{LaunchArgs, RunConfig, Session, SystemCommandRunner};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::from_file("mdrive.json")?;
//!     let session = Session::new(config, Arc::new(SystemCommandRunner))?;
//!
//!     session.init().await?;
//!     session.launch_app(&LaunchArgs::new()).await?;
//!
//!     let test = json!({"title": "opens", "fullName": "App opens", "status": "running"});
//!     session.before_each(&test).await?;
//!     session.client().wait_until_idle().await?;
//!     session.after_each(&json!({"title": "opens", "fullName": "App opens", "status": "passed"})).await?;
//!
//!     session.cleanup().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`device`]: backends, the cross-process registry and the device state machine
//! - [`artifacts`]: the artifact lifecycle, recordings, plugins and their manager
//! - [`tools`]: thin wrappers over adb, emulator, aapt and simctl
//! - [`session`]: the facade a test runner talks to

pub mod artifacts;
pub mod config;
pub mod device;
pub mod environment;
pub mod error;
pub mod exec;
pub mod retry;
pub mod session;
pub mod tools;

#[cfg(test)]
mod testing;

pub use artifacts::{ArtifactHost, ArtifactsManager, RecordingPolicy, TestStatus, TestSummary};
pub use config::{CONFIG_ENV, RunConfig};
pub use device::{
	BackendType, Device, DeviceEvent, DeviceRegistry, DeviceState, LanguageAndLocale, LaunchArgs, Permissions,
};
pub use error::{Error, Result};
pub use exec::{CommandRunner, SystemCommandRunner};
pub use retry::{RetryPolicy, retry};
pub use session::Session;

pub use mdrive_runtime::{Client, ClientConfig};
