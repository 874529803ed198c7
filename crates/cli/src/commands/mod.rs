mod registry;
mod run;

use std::path::Path;

use anyhow::{Context, Result};
use mdrive::RunConfig;
use mdrive::config::RegistryConfig;

use crate::cli::{Cli, Commands};

/// Runs the parsed command line and returns the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32> {
	let config_path = cli.config_path();

	match cli.command {
		Commands::Run { command } => run::execute(&config_path, &command).await,
		Commands::ResetRegistry => {
			registry::reset(&registry_config(&config_path)?).await?;
			Ok(0)
		}
		Commands::Registry => {
			registry::list(&registry_config(&config_path)?).await?;
			Ok(0)
		}
	}
}

fn load_config(path: &Path) -> Result<RunConfig> {
	RunConfig::from_file(path).with_context(|| format!("Failed to load run configuration {}", path.display()))
}

/// Registry settings from the config file, or the defaults when there is none.
fn registry_config(path: &Path) -> Result<RegistryConfig> {
	if !path.exists() {
		tracing::debug!(path = %path.display(), "No config file, using the default registry");
		return Ok(RegistryConfig::default());
	}
	Ok(load_config(path)?.registry)
}
