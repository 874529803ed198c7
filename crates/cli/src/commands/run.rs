use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

use super::{load_config, registry};

/// Clears the registry, then runs `command` with the absolute config path in
/// `MDRIVE_CONFIG`. Returns the runner's exit code.
pub async fn execute(config_path: &Path, command: &[String]) -> Result<i32> {
	let config = load_config(config_path)?;
	let Some((program, args)) = command.split_first() else {
		bail!("No test runner command given");
	};

	registry::reset(&config.registry).await?;

	let config_path = std::path::absolute(config_path)
		.with_context(|| format!("Failed to resolve {}", config_path.display()))?;
	tracing::info!(
		configuration = %config.configuration,
		runner = %command.join(" "),
		"Starting test runner"
	);

	let status = Command::new(program)
		.args(args)
		.env(mdrive::CONFIG_ENV, &config_path)
		.status()
		.await
		.with_context(|| format!("Failed to start {program}"))?;

	match status.code() {
		Some(code) => {
			if code != 0 {
				tracing::warn!(code, "Test runner failed");
			}
			Ok(code)
		}
		None => {
			tracing::warn!("Test runner was killed by a signal");
			Ok(1)
		}
	}
}
