//! Test doubles shared by the unit tests.
//!
//! - [`FakeRunner`]: a [`CommandRunner`] answering from scripted outputs
//! - [`FakeHost`]: an [`ArtifactHost`] keeping "device" files in memory
//! - [`FakeBackend`]: a [`DeviceBackend`] whose devices boot instantly

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::artifacts::ArtifactHost;
use crate::device::{BackendType, DeviceBackend, DevicePool, LaunchArgs, Permissions};
use crate::error::{Error, Result};
use crate::exec::{BackgroundProcess, CommandOutput, CommandRunner, CommandSpec};

#[derive(Default)]
struct RunnerState {
	queued: Vec<(String, VecDeque<CommandOutput>)>,
	sticky: Vec<(String, CommandOutput)>,
	commands: Vec<String>,
	spawned: Vec<String>,
}

/// Scripted [`CommandRunner`].
///
/// Outputs are matched by substring of the rendered command line. Queued
/// outputs are used once, in order; sticky ones answer every time after the
/// queue for that pattern is empty. Unmatched commands succeed with empty
/// output.
#[derive(Default)]
pub struct FakeRunner {
	state: Mutex<RunnerState>,
	interrupted: Arc<Mutex<Vec<String>>>,
}

impl FakeRunner {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn respond(&self, pattern: &str, output: CommandOutput) {
		let mut state = self.state.lock();
		match state.queued.iter_mut().find(|(p, _)| p == pattern) {
			Some((_, queue)) => queue.push_back(output),
			None => state
				.queued
				.push((pattern.to_string(), VecDeque::from([output]))),
		}
	}

	pub fn respond_always(&self, pattern: &str, output: CommandOutput) {
		self.state.lock().sticky.push((pattern.to_string(), output));
	}

	/// Every command line run so far, in order.
	pub fn commands(&self) -> Vec<String> {
		self.state.lock().commands.clone()
	}

	pub fn count(&self, pattern: &str) -> usize {
		self.state
			.lock()
			.commands
			.iter()
			.filter(|c| c.contains(pattern))
			.count()
	}

	pub fn spawned(&self) -> Vec<String> {
		self.state.lock().spawned.clone()
	}

	pub fn interrupted(&self) -> Vec<String> {
		self.interrupted.lock().clone()
	}

	fn answer(&self, line: &str) -> CommandOutput {
		let mut state = self.state.lock();
		state.commands.push(line.to_string());

		if let Some((_, queue)) = state
			.queued
			.iter_mut()
			.find(|(pattern, queue)| !queue.is_empty() && line.contains(pattern.as_str()))
		{
			if let Some(output) = queue.pop_front() {
				return output;
			}
		}

		state
			.sticky
			.iter()
			.find(|(pattern, _)| line.contains(pattern.as_str()))
			.map(|(_, output)| output.clone())
			.unwrap_or_else(|| CommandOutput::ok(""))
	}
}

#[async_trait]
impl CommandRunner for FakeRunner {
	async fn run_once(&self, spec: &CommandSpec) -> Result<CommandOutput> {
		Ok(self.answer(&spec.to_string()))
	}

	async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
		let line = spec.to_string();
		self.state.lock().spawned.push(line.clone());
		Ok(Box::new(FakeProcess {
			line,
			interrupted: Arc::clone(&self.interrupted),
		}))
	}
}

struct FakeProcess {
	line: String,
	interrupted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BackgroundProcess for FakeProcess {
	fn id(&self) -> Option<u32> {
		Some(4242)
	}

	async fn interrupt(self: Box<Self>) -> Result<()> {
		self.interrupted.lock().push(self.line);
		Ok(())
	}
}

/// In-memory [`ArtifactHost`].
///
/// Captures create files in a map; `pull` copies them to the real host
/// filesystem. Every call is appended to [`FakeHost::calls`].
#[derive(Default)]
pub struct FakeHost {
	files: Mutex<HashMap<String, Vec<u8>>>,
	calls: Arc<Mutex<Vec<String>>>,
	counter: AtomicU32,
	/// Number of `file_size` probes that report the file as missing.
	pub missing_probes: AtomicU32,
	/// Makes `pull` fail.
	pub fail_pull: Mutex<bool>,
}

impl FakeHost {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}

	pub fn has_file(&self, path: &str) -> bool {
		self.files.lock().contains_key(path)
	}

	fn record(&self, call: String) {
		self.calls.lock().push(call);
	}
}

#[async_trait]
impl ArtifactHost for FakeHost {
	fn temporary_path(&self, extension: &str) -> String {
		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		format!("/device/tmp/{n}.{extension}")
	}

	async fn start_log(&self, path: &str, pid: Option<u32>) -> Result<Box<dyn BackgroundProcess>> {
		self.record(format!("start_log {path} {pid:?}"));
		self.files
			.lock()
			.insert(path.to_string(), b"log line\n".to_vec());
		Ok(Box::new(FakeProcess {
			line: format!("interrupt log {path}"),
			interrupted: Arc::clone(&self.calls),
		}))
	}

	async fn start_video(&self, path: &str) -> Result<Box<dyn BackgroundProcess>> {
		self.record(format!("start_video {path}"));
		self.files.lock().insert(path.to_string(), b"mp4".to_vec());
		Ok(Box::new(FakeProcess {
			line: format!("interrupt video {path}"),
			interrupted: Arc::clone(&self.calls),
		}))
	}

	async fn take_screenshot(&self, path: &str) -> Result<()> {
		self.record(format!("screenshot {path}"));
		self.files.lock().insert(path.to_string(), b"png".to_vec());
		Ok(())
	}

	async fn file_size(&self, path: &str) -> Result<Option<u64>> {
		self.record(format!("file_size {path}"));
		let missing = self
			.missing_probes
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if missing {
			return Ok(None);
		}
		Ok(self.files.lock().get(path).map(|data| data.len() as u64))
	}

	async fn pull(&self, path: &str, destination: &Path) -> Result<()> {
		self.record(format!("pull {path}"));
		if *self.fail_pull.lock() {
			return Err(Error::Command {
				command: format!("pull {path}"),
				code: Some(1),
				stderr: "remote object does not exist".to_string(),
			});
		}
		let data = self.files.lock().get(path).cloned().unwrap_or_default();
		if let Some(parent) = destination.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(destination, data)?;
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<()> {
		self.record(format!("remove {path}"));
		self.files.lock().remove(path);
		Ok(())
	}
}

/// Scripted [`DeviceBackend`]. Handles equal registry ids.
pub struct FakeBackend {
	ids: Vec<String>,
	running: Mutex<HashSet<String>>,
	calls: Mutex<Vec<String>>,
	host: Arc<FakeHost>,
	next_pid: AtomicU32,
	/// Probes answering "still booting" before a cold-booted device is up.
	pub pending_probes: AtomicU32,
	/// Makes every boot probe answer "still booting".
	pub never_boots: AtomicBool,
}

impl FakeBackend {
	pub fn new(ids: &[&str]) -> Arc<Self> {
		Arc::new(Self {
			ids: ids.iter().map(|id| id.to_string()).collect(),
			running: Mutex::new(HashSet::new()),
			calls: Mutex::new(Vec::new()),
			host: FakeHost::new(),
			next_pid: AtomicU32::new(100),
			pending_probes: AtomicU32::new(0),
			never_boots: AtomicBool::new(false),
		})
	}

	/// Marks `id` as already running.
	pub fn warm(&self, id: &str) {
		self.running.lock().insert(id.to_string());
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}

	pub fn count(&self, prefix: &str) -> usize {
		self.calls
			.lock()
			.iter()
			.filter(|c| c.starts_with(prefix))
			.count()
	}

	pub fn host(&self) -> Arc<FakeHost> {
		Arc::clone(&self.host)
	}

	fn record(&self, call: String) {
		self.calls.lock().push(call);
	}
}

#[async_trait]
impl DevicePool for FakeBackend {
	async fn device_ids(&self, _name: &str) -> Result<Vec<String>> {
		Ok(self.ids.clone())
	}

	async fn create_device(&self, name: &str) -> Result<String> {
		self.record(format!("create_device {name}"));
		Ok(format!("{name}-created"))
	}
}

#[async_trait]
impl DeviceBackend for FakeBackend {
	fn backend_type(&self) -> BackendType {
		BackendType::Simulator
	}

	async fn running_handle(&self, device_id: &str) -> Result<Option<String>> {
		self.record(format!("running_handle {device_id}"));
		Ok(self
			.running
			.lock()
			.contains(device_id)
			.then(|| device_id.to_string()))
	}

	async fn cold_boot(&self, device_id: &str) -> Result<()> {
		self.record(format!("cold_boot {device_id}"));
		self.running.lock().insert(device_id.to_string());
		Ok(())
	}

	async fn probe_boot(&self, device_id: &str) -> Result<Option<String>> {
		self.record(format!("probe_boot {device_id}"));
		if self.never_boots.load(Ordering::SeqCst) {
			return Ok(None);
		}
		let pending = self
			.pending_probes
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if pending || !self.running.lock().contains(device_id) {
			return Ok(None);
		}
		Ok(Some(device_id.to_string()))
	}

	async fn prepare(&self, handle: &str) -> Result<()> {
		self.record(format!("prepare {handle}"));
		Ok(())
	}

	async fn install_app(&self, handle: &str, binary: &Path, _test_binary: Option<&Path>) -> Result<()> {
		self.record(format!("install_app {handle} {}", binary.display()));
		Ok(())
	}

	async fn uninstall_app(&self, handle: &str, bundle_id: &str) -> Result<()> {
		self.record(format!("uninstall_app {handle} {bundle_id}"));
		Ok(())
	}

	async fn launch_app(&self, handle: &str, bundle_id: &str, args: &LaunchArgs) -> Result<u32> {
		let rendered: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
		self.record(format!("launch_app {handle} {bundle_id} {}", rendered.join(" ")));
		Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
	}

	async fn terminate_app(&self, handle: &str, bundle_id: &str) -> Result<()> {
		self.record(format!("terminate_app {handle} {bundle_id}"));
		Ok(())
	}

	async fn send_to_home(&self, handle: &str) -> Result<()> {
		self.record(format!("send_to_home {handle}"));
		Ok(())
	}

	async fn set_location(&self, handle: &str, latitude: f64, longitude: f64) -> Result<()> {
		self.record(format!("set_location {handle} {latitude} {longitude}"));
		Ok(())
	}

	async fn set_permissions(&self, handle: &str, bundle_id: &str, permissions: &Permissions) -> Result<()> {
		let entries: Vec<String> = permissions
			.iter()
			.map(|(service, action)| format!("{service}={}", action.as_str()))
			.collect();
		self.record(format!("set_permissions {handle} {bundle_id} {}", entries.join(" ")));
		Ok(())
	}

	async fn shutdown(&self, handle: &str) -> Result<()> {
		self.record(format!("shutdown {handle}"));
		self.running.lock().remove(handle);
		Ok(())
	}

	async fn reset_content_and_settings(&self, handle: &str) -> Result<()> {
		self.record(format!("reset_content_and_settings {handle}"));
		Ok(())
	}

	async fn bundle_id_from_binary(&self, binary: &Path) -> Result<String> {
		Ok(format!(
			"com.example.{}",
			binary.file_stem().and_then(|s| s.to_str()).unwrap_or("app")
		))
	}

	fn artifact_host(&self, _handle: &str) -> Arc<dyn ArtifactHost> {
		self.host.clone()
	}
}
