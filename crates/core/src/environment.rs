//! Locating platform tools on the host.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const SDK_ROOT_VARS: [&str; 2] = ["ANDROID_SDK_ROOT", "ANDROID_HOME"];

/// Resolves the Android SDK root: the configured path first, then
/// `ANDROID_SDK_ROOT`, then `ANDROID_HOME`.
pub fn android_sdk_root(configured: Option<&Path>) -> Result<PathBuf> {
	resolve_sdk_root(configured, |name| std::env::var(name).ok())
}

fn resolve_sdk_root(
	configured: Option<&Path>,
	lookup: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
	if let Some(path) = configured {
		return Ok(path.to_path_buf());
	}
	SDK_ROOT_VARS
		.iter()
		.find_map(|name| lookup(name).filter(|value| !value.is_empty()))
		.map(PathBuf::from)
		.ok_or_else(|| {
			Error::Config(
				"Android SDK not found: set ANDROID_SDK_ROOT (or ANDROID_HOME) or device.sdkRoot"
					.to_string(),
			)
		})
}

pub fn adb_path(sdk_root: &Path) -> PathBuf {
	sdk_root.join("platform-tools").join("adb")
}

pub fn emulator_path(sdk_root: &Path) -> PathBuf {
	sdk_root.join("emulator").join("emulator")
}

pub fn avdmanager_path(sdk_root: &Path) -> PathBuf {
	sdk_root.join("tools").join("bin").join("avdmanager")
}

/// `aapt` from the newest installed build-tools.
pub fn aapt_path(sdk_root: &Path) -> Result<PathBuf> {
	let build_tools = sdk_root.join("build-tools");
	let mut versions: Vec<String> = std::fs::read_dir(&build_tools)
		.map_err(|e| Error::Config(format!("cannot list {}: {}", build_tools.display(), e)))?
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.path().is_dir())
		.filter_map(|entry| entry.file_name().into_string().ok())
		.collect();
	versions.sort();

	let latest = versions
		.last()
		.ok_or_else(|| Error::Config(format!("no build-tools installed in {}", build_tools.display())))?;
	Ok(build_tools.join(latest).join("aapt"))
}

/// Directory holding `<name>.avd` folders.
pub fn avd_home() -> Result<PathBuf> {
	resolve_avd_home(|name| std::env::var(name).ok())
}

fn resolve_avd_home(lookup: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
	if let Some(dir) = lookup("ANDROID_AVD_HOME").filter(|v| !v.is_empty()) {
		return Ok(PathBuf::from(dir));
	}
	let home = lookup("HOME")
		.or_else(|| lookup("USERPROFILE"))
		.ok_or_else(|| Error::Config("cannot determine home directory for AVDs".to_string()))?;
	Ok(PathBuf::from(home).join(".android").join("avd"))
}
