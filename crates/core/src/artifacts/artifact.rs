//! Artifact lifecycle.
//!
//! ```text
//!  Idle ──start──▶ Running ──stop──▶ Stopped ──save────▶ Saved
//!                     │                  └─────discard──▶ Discarded
//!                     └──save/discard (stops first)──────▶ Saved / Discarded
//! ```
//!
//! Each lifecycle call updates the state immediately and installs its own
//! [`Completion`], then waits for the completion of the call before it. The
//! capture work therefore runs strictly in call order (`start`, then `stop`,
//! then `save` or `discard`), even when the caller does not await a call
//! before issuing the next one. Artifacts never wait on each other.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// A one-shot "this step is finished" signal.
///
/// Cloneable; every clone observes the same [`CompletionHandle`]. Dropping
/// the handle completes the signal too, so a step that fails or is cancelled
/// never blocks its successors.
#[derive(Debug, Clone)]
pub struct Completion {
	rx: watch::Receiver<bool>,
}

/// Completes the paired [`Completion`] when fired or dropped.
#[derive(Debug)]
pub struct CompletionHandle {
	tx: watch::Sender<bool>,
}

impl Completion {
	pub fn new() -> (CompletionHandle, Completion) {
		let (tx, rx) = watch::channel(false);
		(CompletionHandle { tx }, Completion { rx })
	}

	/// An already completed signal.
	pub fn done() -> Self {
		let (handle, completion) = Self::new();
		handle.complete();
		completion
	}

	pub fn is_done(&self) -> bool {
		*self.rx.borrow() || self.rx.has_changed().is_err()
	}

	pub async fn wait(&self) {
		let mut rx = self.rx.clone();
		// Err means the handle was dropped, which counts as done.
		let _ = rx.wait_for(|done| *done).await;
	}
}

impl CompletionHandle {
	pub fn complete(self) {
		let _ = self.tx.send(true);
	}
}

/// Arguments for [`Recording::start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartArgs {
	/// Process id of the app under test, if it is running.
	pub pid: Option<u32>,
}

/// One capture.
///
/// Implementations only do the work; ordering and state guards are the
/// [`Artifact`]'s job.
#[async_trait]
pub trait Recording: Send + Sync {
	async fn start(&self, args: StartArgs) -> Result<()>;

	async fn stop(&self) -> Result<()> {
		Ok(())
	}

	async fn save(&self, destination: &Path) -> Result<()>;

	async fn discard(&self) -> Result<()>;
}

/// Lifecycle state of an [`Artifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
	Idle,
	Running,
	Stopped,
	Saved,
	Discarded,
}

struct Inner {
	state: ArtifactState,
	/// Completion of the most recently issued lifecycle step.
	last: Completion,
}

/// Guarded lifecycle around a [`Recording`].
pub struct Artifact {
	name: String,
	recording: Arc<dyn Recording>,
	inner: Mutex<Inner>,
}

impl std::fmt::Debug for Artifact {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Artifact")
			.field("name", &self.name)
			.field("state", &self.state())
			.finish()
	}
}

impl Artifact {
	pub fn new(name: impl Into<String>, recording: Arc<dyn Recording>) -> Self {
		Self {
			name: name.into(),
			recording,
			inner: Mutex::new(Inner {
				state: ArtifactState::Idle,
				last: Completion::done(),
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn state(&self) -> ArtifactState {
		self.inner.lock().state
	}

	/// Installs a new step: returns the predecessor to wait on and the handle
	/// completing this step.
	fn chain(inner: &mut Inner) -> (Completion, CompletionHandle) {
		let (handle, completion) = Completion::new();
		let previous = std::mem::replace(&mut inner.last, completion);
		(previous, handle)
	}

	/// Starts the capture.
	///
	/// # Errors
	///
	/// [`Error::InvalidArtifactTransition`] unless the artifact is `Idle`.
	pub async fn start(&self, args: StartArgs) -> Result<()> {
		let (previous, handle) = {
			let mut inner = self.inner.lock();
			if inner.state != ArtifactState::Idle {
				return Err(self.invalid("start", inner.state));
			}
			inner.state = ArtifactState::Running;
			Self::chain(&mut inner)
		};

		previous.wait().await;
		tracing::debug!(artifact = %self.name, "starting");
		let result = self.recording.start(args).await;
		handle.complete();
		result.map_err(|e| self.io("start", e))
	}

	/// Stops the capture. A no-op before `start`; once stopped, waits for the
	/// stop already in flight.
	pub async fn stop(&self) -> Result<()> {
		let step = {
			let mut inner = self.inner.lock();
			match inner.state {
				ArtifactState::Idle => Step::Skip,
				ArtifactState::Running => {
					inner.state = ArtifactState::Stopped;
					let (previous, handle) = Self::chain(&mut inner);
					Step::Run(previous, handle)
				}
				_ => Step::Wait(inner.last.clone()),
			}
		};

		let (previous, handle) = match step {
			Step::Skip => return Ok(()),
			Step::Wait(in_flight) => {
				in_flight.wait().await;
				return Ok(());
			}
			Step::Run(previous, handle) => (previous, handle),
		};

		previous.wait().await;
		tracing::debug!(artifact = %self.name, "stopping");
		let result = self.recording.stop().await;
		handle.complete();
		result.map_err(|e| self.io("stop", e))
	}

	/// Stops the capture if needed, waits for any stop in flight, then keeps
	/// the file at `destination`.
	///
	/// # Errors
	///
	/// [`Error::InvalidArtifactTransition`] if the artifact was discarded.
	pub async fn save(&self, destination: impl Into<PathBuf>) -> Result<()> {
		let destination = destination.into();
		self.finish(Terminal::Save(&destination)).await
	}

	/// Stops the capture if needed, waits for any stop in flight, then deletes
	/// the file.
	///
	/// # Errors
	///
	/// [`Error::InvalidArtifactTransition`] if the artifact was saved.
	pub async fn discard(&self) -> Result<()> {
		self.finish(Terminal::Discard).await
	}

	async fn finish(&self, terminal: Terminal<'_>) -> Result<()> {
		let (target, operation) = match terminal {
			Terminal::Save(_) => (ArtifactState::Saved, "save"),
			Terminal::Discard => (ArtifactState::Discarded, "discard"),
		};

		let (step, from) = {
			let mut inner = self.inner.lock();
			let from = inner.state;
			let step = match from {
				state if state == target => Step::Wait(inner.last.clone()),
				ArtifactState::Saved | ArtifactState::Discarded => {
					return Err(self.invalid(operation, from));
				}
				_ => {
					inner.state = target;
					let (previous, handle) = Self::chain(&mut inner);
					Step::Run(previous, handle)
				}
			};
			(step, from)
		};

		let (previous, handle) = match step {
			Step::Run(previous, handle) => (previous, handle),
			Step::Wait(in_flight) => {
				in_flight.wait().await;
				return Ok(());
			}
			Step::Skip => return Ok(()),
		};

		previous.wait().await;

		let result = async {
			match from {
				// Nothing was captured.
				ArtifactState::Idle => return Ok(()),
				ArtifactState::Running => {
					tracing::debug!(artifact = %self.name, "stopping before {}", operation);
					self.recording.stop().await.map_err(|e| self.io("stop", e))?;
				}
				_ => {}
			}

			let outcome = match terminal {
				Terminal::Save(destination) => {
					tracing::debug!(artifact = %self.name, path = %destination.display(), "saving");
					self.recording.save(destination).await
				}
				Terminal::Discard => {
					tracing::debug!(artifact = %self.name, "discarding");
					self.recording.discard().await
				}
			};
			outcome.map_err(|e| self.io(operation, e))
		}
		.await;

		handle.complete();
		result
	}

	fn invalid(&self, operation: &'static str, state: ArtifactState) -> Error {
		Error::InvalidArtifactTransition {
			artifact: self.name.clone(),
			operation,
			state,
		}
	}

	fn io(&self, operation: &'static str, error: Error) -> Error {
		match error {
			Error::ArtifactIo { .. } => error,
			other => Error::ArtifactIo {
				artifact: self.name.clone(),
				operation,
				message: other.to_string(),
			},
		}
	}
}

/// What a lifecycle call does once the lock is released.
enum Step {
	Run(Completion, CompletionHandle),
	Wait(Completion),
	Skip,
}

#[derive(Clone, Copy)]
enum Terminal<'a> {
	Save(&'a Path),
	Discard,
}
