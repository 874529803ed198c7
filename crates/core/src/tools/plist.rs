use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, CommandSpec};

const PLIST_BUDDY: &str = "/usr/libexec/PlistBuddy";

/// `CFBundleIdentifier` from the `Info.plist` of an `.app` bundle.
pub async fn bundle_id(runner: &Arc<dyn CommandRunner>, app: &Path) -> Result<String> {
	let plist = app.join("Info.plist");
	let spec = CommandSpec::new(PLIST_BUDDY)
		.args(["-c", "Print CFBundleIdentifier"])
		.arg(plist.display().to_string());

	let not_found = || {
		Error::Config(format!(
			"CFBundleIdentifier not found inside Info.plist of app binary at {}",
			app.display()
		))
	};

	let output = runner.run(&spec).await.map_err(|_| not_found())?;
	let id = output.stdout.trim();
	if id.is_empty() {
		return Err(not_found());
	}
	Ok(id.to_string())
}
