//! Runs the `mdrive` binary against a temporary registry.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::json;

fn mdrive() -> Command {
	let mut command = Command::new(env!("CARGO_BIN_EXE_mdrive"));
	command.env_remove("MDRIVE_CONFIG").env_remove("RUST_LOG");
	command
}

/// Writes a config whose registry lives in `dir` and returns its path.
fn write_config(dir: &Path) -> PathBuf {
	let path = dir.join("mdrive.json");
	let config = json!({
		"configuration": "android.emu",
		"device": {"type": "android.emulator", "name": "Pixel_7", "binaryPath": "app.apk"},
		"session": {"server": "ws://localhost:8099", "sessionId": "s1"},
		"registry": {"lockFile": dir.join("device.registry.json")}
	});
	std::fs::write(&path, config.to_string()).unwrap();
	path
}

fn stdout(command: &mut Command) -> String {
	let output = command.output().expect("failed to execute mdrive");
	assert!(
		output.status.success(),
		"mdrive failed: {}",
		String::from_utf8_lossy(&output.stderr)
	);
	String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn registry_lists_busy_devices() {
	let dir = tempfile::tempdir().unwrap();
	let config = write_config(dir.path());
	std::fs::write(dir.path().join("device.registry.json"), r#"["emulator-5554"]"#).unwrap();

	let listed = stdout(mdrive().arg("--config").arg(&config).arg("registry"));

	assert_eq!(listed, r#"["emulator-5554"]"#);
}

#[test]
fn reset_registry_forgets_busy_devices() {
	let dir = tempfile::tempdir().unwrap();
	let config = write_config(dir.path());
	std::fs::write(dir.path().join("device.registry.json"), r#"["A","B"]"#).unwrap();

	stdout(mdrive().arg("--config").arg(&config).arg("reset-registry"));

	let record = std::fs::read_to_string(dir.path().join("device.registry.json")).unwrap();
	assert_eq!(record, "[]");
}

#[test]
fn invalid_config_is_reported() {
	let dir = tempfile::tempdir().unwrap();
	let config = dir.path().join("mdrive.json");
	std::fs::write(&config, r#"{"device": {}}"#).unwrap();

	let output = mdrive()
		.arg("--config")
		.arg(&config)
		.arg("registry")
		.output()
		.unwrap();

	assert!(!output.status.success());
	assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load run configuration"));
}

#[cfg(unix)]
#[test]
fn run_resets_registry_and_exports_config() {
	let dir = tempfile::tempdir().unwrap();
	let config = write_config(dir.path());
	std::fs::write(dir.path().join("device.registry.json"), r#"["stale"]"#).unwrap();

	let output = mdrive()
		.arg("--config")
		.arg(&config)
		.args(["run", "--", "sh", "-c", "cat \"$MDRIVE_CONFIG\" >/dev/null && echo \"$MDRIVE_CONFIG\"; exit 3"])
		.output()
		.unwrap();

	assert_eq!(output.status.code(), Some(3));
	let exported = String::from_utf8_lossy(&output.stdout).trim().to_string();
	assert!(Path::new(&exported).is_absolute());
	assert!(exported.ends_with("mdrive.json"));
	let record = std::fs::read_to_string(dir.path().join("device.registry.json")).unwrap();
	assert_eq!(record, "[]");
}
