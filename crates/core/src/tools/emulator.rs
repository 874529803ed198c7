use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::{BackgroundProcess, CommandRunner, CommandSpec};

/// Wrapper around the Android `emulator` binary.
#[derive(Clone)]
pub struct Emulator {
	runner: Arc<dyn CommandRunner>,
	program: String,
}

impl Emulator {
	pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
		Self {
			runner,
			program: program.into(),
		}
	}

	pub async fn list_avds(&self) -> Result<Vec<String>> {
		let output = self
			.runner
			.run(&CommandSpec::new(&self.program).arg("-list-avds"))
			.await?;
		Ok(output
			.stdout
			.lines()
			.map(str::trim)
			// Newer emulators prefix the listing with INFO lines.
			.filter(|line| !line.is_empty() && !line.starts_with("INFO"))
			.map(str::to_string)
			.collect())
	}

	/// Starts the emulator in the background. It keeps running after the
	/// returned handle is dropped.
	pub async fn boot(&self, avd_name: &str, headless: bool) -> Result<Box<dyn BackgroundProcess>> {
		let mut spec = CommandSpec::new(&self.program)
			.args(["-avd", avd_name])
			.args(["-verbose", "-no-audio", "-no-boot-anim"]);
		if headless {
			spec = spec.arg("-no-window");
		}
		tracing::info!(avd = avd_name, headless, "Booting emulator");
		self.runner.spawn(&spec).await
	}
}

/// Gives an AVD a `skin.name` derived from its LCD size when it has none.
///
/// Some AVDs created outside Android Studio lack it, and the emulator then
/// refuses to boot headless.
pub fn fix_config_ini_skin_name(avd_home: &Path, avd_name: &str) -> Result<()> {
	let path = avd_home.join(format!("{avd_name}.avd")).join("config.ini");
	let text = std::fs::read_to_string(&path)
		.map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

	let value = |key: &str| {
		text.lines().find_map(|line| {
			let (k, v) = line.split_once('=')?;
			(k.trim() == key).then(|| v.trim().to_string())
		})
	};

	if value("skin.name").is_some_and(|v| !v.is_empty()) {
		return Ok(());
	}

	let (Some(width), Some(height)) = (value("hw.lcd.width"), value("hw.lcd.height")) else {
		return Err(Error::Config(format!(
			"Emulator {avd_name} has a corrupt config.ini ({}); try recreating it",
			path.display()
		)));
	};

	let mut fixed: String = text
		.lines()
		.filter(|line| line.split_once('=').is_none_or(|(k, _)| k.trim() != "skin.name"))
		.map(|line| format!("{line}\n"))
		.collect();
	fixed.push_str(&format!("skin.name={width}x{height}\n"));
	std::fs::write(&path, fixed)?;
	tracing::debug!(avd = avd_name, "Added skin.name to config.ini");
	Ok(())
}
