use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::exec::{BackgroundProcess, CommandRunner, CommandSpec};

/// Kind of an adb-attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbDeviceKind {
	Emulator,
	Device,
}

/// One line of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDevice {
	pub serial: String,
	pub kind: AdbDeviceKind,
	/// `device`, `offline`, `unauthorized`, ...
	pub state: String,
	/// AVD name, for emulators.
	pub avd_name: Option<String>,
}

impl AdbDevice {
	pub fn is_online(&self) -> bool {
		self.state == "device"
	}
}

/// Options for [`Adb::logcat`].
#[derive(Debug, Clone, Default)]
pub struct LogcatOptions {
	/// Only lines of this process.
	pub pid: Option<u32>,
	/// Only lines logged after this device time (`MM-DD hh:mm:ss.mmm`).
	pub since: Option<String>,
}

/// Wrapper around the `adb` binary.
#[derive(Clone)]
pub struct Adb {
	runner: Arc<dyn CommandRunner>,
	program: String,
}

impl Adb {
	pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
		Self {
			runner,
			program: program.into(),
		}
	}

	fn command(&self) -> CommandSpec {
		CommandSpec::new(&self.program)
	}

	fn on(&self, serial: &str) -> CommandSpec {
		self.command().args(["-s", serial])
	}

	async fn shell(&self, serial: &str, command: &str) -> Result<String> {
		let output = self
			.runner
			.run(&self.on(serial).arg("shell").arg(command))
			.await?;
		Ok(output.stdout)
	}

	/// Every attached device; emulators carry their AVD name.
	pub async fn devices(&self) -> Result<Vec<AdbDevice>> {
		let output = self.runner.run(&self.command().arg("devices")).await?;
		let mut devices = parse_devices(&output.stdout);

		for device in devices
			.iter_mut()
			.filter(|d| d.kind == AdbDeviceKind::Emulator && d.is_online())
		{
			let output = self
				.runner
				.run(&self.on(&device.serial).args(["emu", "avd", "name"]))
				.await?;
			device.avd_name = output
				.stdout
				.lines()
				.map(str::trim)
				.find(|line| !line.is_empty())
				.map(str::to_string);
		}
		Ok(devices)
	}

	pub async fn is_boot_complete(&self, serial: &str) -> Result<bool> {
		// A booting emulator makes adb fail for a while; that is not an error here.
		let output = self
			.runner
			.run_once(&self.on(serial).args(["shell", "getprop", "dev.bootcomplete"]))
			.await?;
		Ok(output.success() && output.stdout.trim() == "1")
	}

	pub async fn api_level(&self, serial: &str) -> Result<u32> {
		let value = self.shell(serial, "getprop ro.build.version.sdk").await?;
		value.trim().parse().map_err(|_| Error::Command {
			command: "getprop ro.build.version.sdk".to_string(),
			code: None,
			stderr: format!("unexpected API level {:?}", value.trim()),
		})
	}

	pub async fn unlock_screen(&self, serial: &str) -> Result<()> {
		self.shell(serial, "input keyevent 82").await.map(drop)
	}

	/// Installs an apk, replacing an existing installation.
	pub async fn install(&self, serial: &str, apk: &Path) -> Result<()> {
		let api = self.api_level(serial).await?;
		let mut spec = self.on(serial).arg("install").arg("-r");
		if api >= 23 {
			// Grant runtime permissions up front.
			spec = spec.arg("-g");
		}
		spec = spec
			.arg(apk.display().to_string())
			.retries(3, Duration::from_millis(1000));
		self.runner.run(&spec).await.map(drop)
	}

	pub async fn uninstall(&self, serial: &str, package: &str) -> Result<()> {
		let output = self
			.runner
			.run_once(&self.on(serial).args(["uninstall", package]))
			.await?;
		if !output.success() {
			tracing::debug!(serial, package, "uninstall: {}", output.stderr.trim());
		}
		Ok(())
	}

	/// Runner class of `package`'s instrumentation.
	pub async fn instrumentation_runner(&self, serial: &str, package: &str) -> Result<String> {
		let listing = self.shell(serial, "pm list instrumentation").await?;
		parse_instrumentation_runner(&listing, package).ok_or_else(|| Error::Command {
			command: "pm list instrumentation".to_string(),
			code: None,
			stderr: format!("no instrumentation runner installed for {package}"),
		})
	}

	/// Starts the instrumentation that hosts the app under test.
	pub async fn instrument(
		&self,
		serial: &str,
		runner_class: &str,
		args: &[(String, String)],
	) -> Result<Box<dyn BackgroundProcess>> {
		let mut spec = self.on(serial).args(["shell", "am", "instrument", "-w", "-r"]);
		for (key, value) in args {
			spec = spec.arg("-e").arg(key.as_str()).arg(value.as_str());
		}
		spec = spec.args(["-e", "debug", "false"]).arg(runner_class);
		self.runner.spawn(&spec).await
	}

	pub async fn pidof(&self, serial: &str, package: &str) -> Result<Option<u32>> {
		let output = self
			.runner
			.run_once(&self.on(serial).args(["shell", "pidof", package]))
			.await?;
		Ok(output
			.stdout
			.split_whitespace()
			.next()
			.and_then(|pid| pid.parse().ok()))
	}

	pub async fn force_stop(&self, serial: &str, package: &str) -> Result<()> {
		self.shell(serial, &format!("am force-stop {package}"))
			.await
			.map(drop)
	}

	pub async fn press_home(&self, serial: &str) -> Result<()> {
		self.shell(serial, "input keyevent 3").await.map(drop)
	}

	/// Emulator console `geo fix`; longitude comes first.
	pub async fn geo_fix(&self, serial: &str, latitude: f64, longitude: f64) -> Result<()> {
		self.runner
			.run(&self.on(serial).args([
				"emu".to_string(),
				"geo".to_string(),
				"fix".to_string(),
				longitude.to_string(),
				latitude.to_string(),
			]))
			.await
			.map(drop)
	}

	/// Current device time in logcat's `-T` format.
	pub async fn now(&self, serial: &str) -> Result<String> {
		let output = self.shell(serial, "date +\"%m-%d %T.000\"").await?;
		Ok(output.trim().to_string())
	}

	pub async fn screencap(&self, serial: &str, path: &str) -> Result<()> {
		self.shell(serial, &format!("screencap -p {path}"))
			.await
			.map(drop)
	}

	pub async fn screenrecord(&self, serial: &str, path: &str) -> Result<Box<dyn BackgroundProcess>> {
		self.runner
			.spawn(&self.on(serial).args(["shell", "screenrecord", path]))
			.await
	}

	/// Streams logcat into `path` on the device.
	pub async fn logcat(
		&self,
		serial: &str,
		path: &str,
		options: &LogcatOptions,
	) -> Result<Box<dyn BackgroundProcess>> {
		let mut spec = self.on(serial).args(["shell", "logcat"]);
		if let Some(since) = &options.since {
			spec = spec.arg("-T").arg(since.as_str());
		}
		spec = spec.arg("-f").arg(path);
		if let Some(pid) = options.pid {
			spec = spec.arg(format!("--pid={pid}"));
		}
		self.runner.spawn(&spec).await
	}

	/// Size of a device file, `None` if it does not exist.
	pub async fn file_size(&self, serial: &str, path: &str) -> Result<Option<u64>> {
		let output = self
			.runner
			.run_once(&self.on(serial).args(["shell", "wc", "-c", path]))
			.await?;
		if !output.success() {
			return Ok(None);
		}
		Ok(output
			.stdout
			.split_whitespace()
			.next()
			.and_then(|size| size.parse().ok()))
	}

	pub async fn pull(&self, serial: &str, path: &str, destination: &Path) -> Result<()> {
		if let Some(parent) = destination.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		self.runner
			.run(
				&self
					.on(serial)
					.args(["pull", path])
					.arg(destination.display().to_string()),
			)
			.await
			.map(drop)
	}

	pub async fn rm(&self, serial: &str, path: &str) -> Result<()> {
		self.shell(serial, &format!("rm -f {path}")).await.map(drop)
	}

	/// Kills an emulator through its console.
	pub async fn emu_kill(&self, serial: &str) -> Result<()> {
		self.runner
			.run(&self.on(serial).args(["emu", "kill"]))
			.await
			.map(drop)
	}
}

fn parse_devices(output: &str) -> Vec<AdbDevice> {
	output
		.lines()
		.skip_while(|line| !line.starts_with("List of devices"))
		.skip(1)
		.filter_map(|line| {
			let mut fields = line.split_whitespace();
			let serial = fields.next()?;
			let state = fields.next()?;
			let kind = if serial.starts_with("emulator-") {
				AdbDeviceKind::Emulator
			} else {
				AdbDeviceKind::Device
			};
			Some(AdbDevice {
				serial: serial.to_string(),
				kind,
				state: state.to_string(),
				avd_name: None,
			})
		})
		.collect()
}

fn parse_instrumentation_runner(listing: &str, package: &str) -> Option<String> {
	let target = format!("(target={package})");
	listing.lines().find_map(|line| {
		let line = line.trim();
		if !line.ends_with(&target) {
			return None;
		}
		let runner = line.strip_prefix("instrumentation:")?;
		runner.split_whitespace().next().map(str::to_string)
	})
}
