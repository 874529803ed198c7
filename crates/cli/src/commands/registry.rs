use anyhow::{Context, Result};
use mdrive::DeviceRegistry;
use mdrive::config::RegistryConfig;

pub async fn reset(config: &RegistryConfig) -> Result<()> {
	let registry = DeviceRegistry::new(&config.lock_file);
	registry
		.reset()
		.await
		.with_context(|| format!("Failed to reset {}", registry.path().display()))?;
	tracing::info!(path = %registry.path().display(), "Device registry cleared");
	Ok(())
}

/// Prints the busy device ids as a JSON array on stdout.
pub async fn list(config: &RegistryConfig) -> Result<()> {
	let registry = DeviceRegistry::new(&config.lock_file);
	let busy = registry
		.busy_devices()
		.await
		.with_context(|| format!("Failed to read {}", registry.path().display()))?;
	println!("{}", serde_json::to_string(&busy)?);
	Ok(())
}
