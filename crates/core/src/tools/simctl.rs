use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::device::Permissions;
use crate::error::{Error, Result};
use crate::exec::{BackgroundProcess, CommandRunner, CommandSpec};

/// A simulator as listed by `simctl list devices -j`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimDevice {
	pub udid: String,
	pub name: String,
	pub state: String,
	#[serde(default = "available")]
	pub is_available: bool,
}

fn available() -> bool {
	true
}

impl SimDevice {
	pub fn is_booted(&self) -> bool {
		self.state == "Booted"
	}
}

#[derive(Deserialize)]
struct DeviceListing {
	devices: BTreeMap<String, Vec<SimDevice>>,
}

/// Wrapper around `xcrun simctl`.
#[derive(Clone)]
pub struct Simctl {
	runner: Arc<dyn CommandRunner>,
}

impl Simctl {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		Self { runner }
	}

	fn command(&self) -> CommandSpec {
		CommandSpec::new("xcrun").arg("simctl")
	}

	async fn run(&self, spec: CommandSpec) -> Result<String> {
		Ok(self.runner.run(&spec).await?.stdout)
	}

	pub async fn list(&self) -> Result<Vec<SimDevice>> {
		let json = self.run(self.command().args(["list", "devices", "-j"])).await?;
		let listing: DeviceListing = serde_json::from_str(&json)?;
		Ok(listing.devices.into_values().flatten().collect())
	}

	/// Available simulators named `name`.
	///
	/// `name` may carry an OS suffix (`"iPhone 15, iOS 17.2"`); only the
	/// device name part is matched.
	pub async fn find_by_name(&self, name: &str) -> Result<Vec<SimDevice>> {
		let device_name = name.split(',').next().unwrap_or(name).trim();
		Ok(self
			.list()
			.await?
			.into_iter()
			.filter(|d| d.is_available && d.name == device_name)
			.collect())
	}

	pub async fn device(&self, udid: &str) -> Result<Option<SimDevice>> {
		Ok(self.list().await?.into_iter().find(|d| d.udid == udid))
	}

	/// Creates a simulator of device type `name` and returns its udid.
	pub async fn create(&self, name: &str) -> Result<String> {
		let device_type = name.split(',').next().unwrap_or(name).trim();
		let udid = self
			.run(self.command().args(["create", device_type, device_type]))
			.await?;
		let udid = udid.trim();
		if udid.is_empty() {
			return Err(Error::Command {
				command: format!("xcrun simctl create {device_type}"),
				code: None,
				stderr: "no udid printed".to_string(),
			});
		}
		tracing::info!(udid, name = device_type, "Created simulator");
		Ok(udid.to_string())
	}

	/// Issues `simctl boot` without waiting for it to finish.
	pub async fn boot(&self, udid: &str) -> Result<()> {
		let output = self
			.runner
			.run_once(&self.command().args(["boot", udid]))
			.await?;
		if output.success() || output.stderr.contains("current state: Booted") {
			return Ok(());
		}
		Err(Error::Command {
			command: format!("xcrun simctl boot {udid}"),
			code: output.code,
			stderr: output.stderr.trim().to_string(),
		})
	}

	/// Shuts the simulator down. Already shut down is fine.
	pub async fn shutdown(&self, udid: &str) -> Result<()> {
		let output = self
			.runner
			.run_once(&self.command().args(["shutdown", udid]))
			.await?;
		if output.success() || output.stderr.contains("current state: Shutdown") {
			return Ok(());
		}
		Err(Error::Command {
			command: format!("xcrun simctl shutdown {udid}"),
			code: output.code,
			stderr: output.stderr.trim().to_string(),
		})
	}

	pub async fn erase(&self, udid: &str) -> Result<()> {
		self.run(self.command().args(["erase", udid])).await.map(drop)
	}

	pub async fn install(&self, udid: &str, app: &Path) -> Result<()> {
		self.run(
			self.command()
				.args(["install", udid])
				.arg(app.display().to_string()),
		)
		.await
		.map(drop)
	}

	pub async fn uninstall(&self, udid: &str, bundle_id: &str) -> Result<()> {
		self.run(self.command().args(["uninstall", udid, bundle_id]))
			.await
			.map(drop)
	}

	/// Launches the app with `-key value` arguments and returns its pid.
	pub async fn launch(&self, udid: &str, bundle_id: &str, args: &[(String, String)]) -> Result<u32> {
		let mut spec = self.command().args(["launch", udid, bundle_id]);
		if !args.is_empty() {
			spec = spec.arg("--args");
			for (key, value) in args {
				spec = spec.arg(format!("-{key}")).arg(value.as_str());
			}
		}
		let command = spec.to_string();
		let stdout = self.run(spec).await?;
		parse_launch_pid(&stdout).ok_or_else(|| Error::Command {
			command,
			code: Some(0),
			stderr: format!("cannot read pid from {:?}", stdout.trim()),
		})
	}

	pub async fn terminate(&self, udid: &str, bundle_id: &str) -> Result<()> {
		let output = self
			.runner
			.run_once(&self.command().args(["terminate", udid, bundle_id]))
			.await?;
		if !output.success() {
			// Not running.
			tracing::debug!(udid, bundle_id, "terminate: {}", output.stderr.trim());
		}
		Ok(())
	}

	pub async fn send_to_home(&self, udid: &str) -> Result<()> {
		self.run(self.command().args(["launch", udid, "com.apple.springboard"]))
			.await
			.map(drop)
	}

	pub async fn set_location(&self, udid: &str, latitude: f64, longitude: f64) -> Result<()> {
		self.run(self.command().args(["location", udid, "set"]).arg(format!("{latitude},{longitude}")))
			.await
			.map(drop)
	}

	/// Runs `simctl privacy` once per service.
	pub async fn set_permissions(&self, udid: &str, bundle_id: &str, permissions: &Permissions) -> Result<()> {
		for (service, action) in permissions {
			self.run(
				self.command()
					.args(["privacy", udid, action.as_str()])
					.args([service.as_str(), bundle_id]),
			)
			.await?;
		}
		Ok(())
	}

	pub async fn screenshot(&self, udid: &str, path: &str) -> Result<()> {
		self.run(self.command().args(["io", udid, "screenshot", path]))
			.await
			.map(drop)
	}

	pub async fn record_video(&self, udid: &str, path: &str) -> Result<Box<dyn BackgroundProcess>> {
		self.runner
			.spawn(&self.command().args(["io", udid, "recordVideo", path]))
			.await
	}

	/// Streams the simulator log into the host file `path`.
	pub async fn log_stream(
		&self,
		udid: &str,
		path: &str,
		pid: Option<u32>,
	) -> Result<Box<dyn BackgroundProcess>> {
		let mut spec = self
			.command()
			.args(["spawn", udid, "log", "stream"])
			.args(["--level", "debug", "--style", "compact"]);
		if let Some(pid) = pid {
			spec = spec
				.arg("--predicate")
				.arg(format!("processIdentifier == {pid}"));
		}
		self.runner.spawn(&spec.stdout_to(path)).await
	}
}

fn parse_launch_pid(stdout: &str) -> Option<u32> {
	// "com.example.app: 12345"
	stdout
		.lines()
		.find_map(|line| line.rsplit_once(':'))
		.and_then(|(_, pid)| pid.trim().parse().ok())
}
