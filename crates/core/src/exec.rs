//! Process control for the platform tools.
//!
//! Every tool wrapper goes through a [`CommandRunner`], so tests can script
//! tool output and the real implementation ([`SystemCommandRunner`]) stays in
//! one place. Long-running captures (logcat, screen recording, the emulator
//! itself) are started with [`CommandRunner::spawn`] and stopped through
//! [`BackgroundProcess::interrupt`].

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, retry};

/// A command line plus how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	pub program: String,
	pub args: Vec<String>,
	/// Redirects stdout of a spawned process to this file.
	pub stdout: Option<PathBuf>,
	/// Attempts for flaky tools; 1 means no retry.
	pub retries: u32,
	pub retry_interval: Duration,
}

impl CommandSpec {
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			stdout: None,
			retries: 1,
			retry_interval: Duration::from_millis(1000),
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
		self.stdout = Some(path.into());
		self
	}

	pub fn retries(mut self, attempts: u32, interval: Duration) -> Self {
		self.retries = attempts;
		self.retry_interval = interval;
		self
	}

	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::new(self.retries, self.retry_interval)
	}
}

impl fmt::Display for CommandSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.program)?;
		for arg in &self.args {
			if arg.is_empty() || arg.contains(char::is_whitespace) {
				write!(f, " \"{arg}\"")?;
			} else {
				write!(f, " {arg}")?;
			}
		}
		Ok(())
	}
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
	/// Exit code; `None` if the process was killed by a signal.
	pub code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl CommandOutput {
	pub fn ok(stdout: impl Into<String>) -> Self {
		Self {
			code: Some(0),
			stdout: stdout.into(),
			stderr: String::new(),
		}
	}

	pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
		Self {
			code: Some(code),
			stdout: String::new(),
			stderr: stderr.into(),
		}
	}

	pub fn success(&self) -> bool {
		self.code == Some(0)
	}

	fn into_result(self, spec: &CommandSpec) -> Result<Self> {
		if self.success() {
			return Ok(self);
		}
		Err(Error::Command {
			command: spec.to_string(),
			code: self.code,
			stderr: self.stderr.trim().to_string(),
		})
	}
}

/// A process started in the background.
#[async_trait]
pub trait BackgroundProcess: Send {
	/// OS process id, if known.
	fn id(&self) -> Option<u32>;

	/// Asks the process to finish (SIGINT where available) and waits for it.
	async fn interrupt(self: Box<Self>) -> Result<()>;
}

/// Runs external tools.
#[async_trait]
pub trait CommandRunner: Send + Sync {
	/// Runs the command once and captures its output, whatever the exit code.
	async fn run_once(&self, spec: &CommandSpec) -> Result<CommandOutput>;

	/// Starts the command without waiting for it.
	async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>>;

	/// Runs the command, retrying per `spec.retries`, and fails on a non-zero exit.
	async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
		let mut attempt = 0;
		retry(spec.retry_policy(), || {
			attempt += 1;
			let current = attempt;
			async move {
				tracing::debug!(command = %spec, attempt = current, "exec");
				let output = self.run_once(spec).await?.into_result(spec);
				if let Err(e) = &output {
					if current < spec.retries {
						tracing::debug!(command = %spec, "Retrying after failure: {}", e);
					}
				}
				output
			}
		})
		.await
	}
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
	fn command(spec: &CommandSpec) -> Command {
		let mut command = Command::new(&spec.program);
		command.args(&spec.args).stdin(Stdio::null());
		command
	}
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
	async fn run_once(&self, spec: &CommandSpec) -> Result<CommandOutput> {
		let output = Self::command(spec).output().await.map_err(|e| Error::Command {
			command: spec.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;

		Ok(CommandOutput {
			code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}

	async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
		let mut command = Self::command(spec);
		match &spec.stdout {
			Some(path) => {
				let file = std::fs::File::create(path)?;
				command.stdout(Stdio::from(file));
			}
			None => {
				command.stdout(Stdio::null());
			}
		}
		command.stderr(Stdio::null());
		// A capture dropped without an interrupt must not outlive the run.
		command.kill_on_drop(true);

		let child = command.spawn().map_err(|e| Error::Command {
			command: spec.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;
		tracing::debug!(command = %spec, pid = ?child.id(), "spawned");

		Ok(Box::new(SystemProcess {
			child,
			command: spec.to_string(),
		}))
	}
}

struct SystemProcess {
	child: Child,
	command: String,
}

#[async_trait]
impl BackgroundProcess for SystemProcess {
	fn id(&self) -> Option<u32> {
		self.child.id()
	}

	async fn interrupt(mut self: Box<Self>) -> Result<()> {
		let Some(pid) = self.child.id() else {
			// Already reaped.
			return Ok(());
		};

		#[cfg(unix)]
		{
			use nix::sys::signal::{Signal, kill};
			use nix::unistd::Pid;

			if let Err(errno) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
				tracing::debug!(pid, command = %self.command, "SIGINT failed: {}", errno);
				self.child.start_kill()?;
			}
		}
		#[cfg(not(unix))]
		{
			tracing::debug!(pid, command = %self.command, "killing");
			self.child.start_kill()?;
		}

		let status = self.child.wait().await?;
		tracing::debug!(pid, command = %self.command, ?status, "background process exited");
		Ok(())
	}
}
