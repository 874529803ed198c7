use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, CommandSpec};

/// Reads apk metadata with `aapt`.
#[derive(Clone)]
pub struct Aapt {
	runner: Arc<dyn CommandRunner>,
	program: String,
}

impl Aapt {
	pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
		Self {
			runner,
			program: program.into(),
		}
	}

	/// Package name declared in the apk manifest.
	pub async fn package_name(&self, apk: &Path) -> Result<String> {
		let spec = CommandSpec::new(&self.program)
			.args(["dump", "badging"])
			.arg(apk.display().to_string());
		let output = self.runner.run(&spec).await?;
		parse_package_name(&output.stdout).ok_or_else(|| Error::Command {
			command: spec.to_string(),
			code: output.code,
			stderr: format!("no package name in the badging of {}", apk.display()),
		})
	}
}

fn parse_package_name(badging: &str) -> Option<String> {
	let line = badging.lines().find(|l| l.starts_with("package: "))?;
	let rest = &line[line.find("name='")? + "name='".len()..];
	let end = rest.find('\'')?;
	Some(rest[..end].to_string())
}
