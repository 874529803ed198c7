//! Thin async wrappers over the platform command-line tools.
//!
//! Each wrapper only builds command lines and parses output; all process
//! handling goes through [`crate::exec::CommandRunner`].

mod aapt;
mod adb;
mod emulator;
pub mod plist;
mod simctl;

pub use aapt::Aapt;
pub use adb::{Adb, AdbDevice, AdbDeviceKind, LogcatOptions};
pub use emulator::{Emulator, fix_config_ini_skin_name};
pub use simctl::{SimDevice, Simctl};
