//! Cross-process device allocation.
//!
//! The busy devices are kept as a JSON array of ids in a shared file. Every
//! read-modify-write of that file happens under an exclusive lock on the
//! file itself (`flock` on unix, a `<file>.lock` sentinel elsewhere), so
//! parallel test workers never hand out the same device.
//!
//! [`DeviceRegistry::reset`] empties the record. It is called once at the
//! start of a run, which forgets devices left busy by a crashed run; a device
//! still used by a stray process may then be handed out again.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::DevicePool;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, retry_while};

/// Allocates devices from a [`DevicePool`] under a file lock.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
	path: PathBuf,
	contention: RetryPolicy,
}

impl DeviceRegistry {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			contention: RetryPolicy::REGISTRY_CONTENTION,
		}
	}

	pub fn with_contention_policy(mut self, policy: RetryPolicy) -> Self {
		self.contention = policy;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Picks a device matching `name` that no one holds, creating one if all
	/// are busy, and marks it busy.
	pub async fn get_device<P: DevicePool + ?Sized>(&self, pool: &P, name: &str) -> Result<String> {
		let mut record = self.lock().await?;
		let mut busy = record.read()?;

		let candidates = pool.device_ids(name).await?;
		let device_id = match candidates.into_iter().find(|id| !busy.contains(id)) {
			Some(id) => id,
			None => {
				tracing::info!(name, "No free device, creating one");
				pool.create_device(name).await?
			}
		};

		busy.push(device_id.clone());
		record.write(&busy)?;
		tracing::debug!(device_id = %device_id, busy = busy.len(), "Device allocated");
		Ok(device_id)
	}

	/// Marks `device_id` free. Unknown ids are ignored.
	pub async fn free_device(&self, device_id: &str) -> Result<()> {
		let mut record = self.lock().await?;
		let mut busy = record.read()?;
		busy.retain(|id| id != device_id);
		record.write(&busy)?;
		tracing::debug!(device_id, "Device freed");
		Ok(())
	}

	/// Forgets every busy device.
	pub async fn reset(&self) -> Result<()> {
		let mut record = self.lock().await?;
		record.write(&[])
	}

	pub async fn busy_devices(&self) -> Result<Vec<String>> {
		let mut record = self.lock().await?;
		record.read()
	}

	async fn lock(&self) -> Result<LockedRecord> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| Error::Registry(format!("cannot create {}: {}", parent.display(), e)))?;
		}

		let result = retry_while(
			self.contention,
			|| async move {
				let locked = LockedRecord::try_lock(&self.path);
				if let Err(Error::RegistryContention(holder)) = &locked {
					tracing::debug!(path = %holder, "Registry lock is held, waiting");
				}
				locked
			},
			|e| matches!(e, Error::RegistryContention(_)),
		)
		.await;

		result.map_err(|e| match e {
			Error::RegistryContention(message) => Error::Registry(format!(
				"gave up waiting for the lock on {} after {} attempts: {}",
				self.path.display(),
				self.contention.max_attempts,
				message
			)),
			other => other,
		})
	}
}

/// The record file, held under an exclusive lock until dropped.
struct LockedRecord {
	#[cfg(unix)]
	file: nix::fcntl::Flock<File>,
	#[cfg(not(unix))]
	file: File,
	#[cfg(not(unix))]
	sentinel: PathBuf,
}

impl LockedRecord {
	fn open(path: &Path) -> Result<File> {
		OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(false)
			.open(path)
			.map_err(|e| Error::Registry(format!("cannot open {}: {}", path.display(), e)))
	}

	#[cfg(unix)]
	fn try_lock(path: &Path) -> Result<Self> {
		use nix::errno::Errno;
		use nix::fcntl::{Flock, FlockArg};

		let file = Self::open(path)?;
		match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
			Ok(file) => Ok(Self { file }),
			Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
				Err(Error::RegistryContention(path.display().to_string()))
			}
			Err((_, errno)) => Err(Error::Registry(format!(
				"cannot lock {}: {}",
				path.display(),
				errno
			))),
		}
	}

	#[cfg(not(unix))]
	fn try_lock(path: &Path) -> Result<Self> {
		let mut sentinel = path.as_os_str().to_owned();
		sentinel.push(".lock");
		let sentinel = PathBuf::from(sentinel);

		match OpenOptions::new().write(true).create_new(true).open(&sentinel) {
			Ok(_) => {}
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
				return Err(Error::RegistryContention(sentinel.display().to_string()));
			}
			Err(e) => {
				return Err(Error::Registry(format!(
					"cannot create {}: {}",
					sentinel.display(),
					e
				)));
			}
		}

		match Self::open(path) {
			Ok(file) => Ok(Self { file, sentinel }),
			Err(e) => {
				let _ = std::fs::remove_file(&sentinel);
				Err(e)
			}
		}
	}

	fn read(&mut self) -> Result<Vec<String>> {
		let mut text = String::new();
		self.file.seek(SeekFrom::Start(0))?;
		self.file.read_to_string(&mut text)?;
		if text.trim().is_empty() {
			return Ok(Vec::new());
		}
		serde_json::from_str(&text)
			.map_err(|e| Error::Registry(format!("corrupt registry record: {}", e)))
	}

	fn write(&mut self, busy: &[String]) -> Result<()> {
		let text = serde_json::to_string(busy)?;
		self.file.set_len(0)?;
		self.file.seek(SeekFrom::Start(0))?;
		self.file.write_all(text.as_bytes())?;
		self.file.sync_data()?;
		Ok(())
	}
}

#[cfg(not(unix))]
impl Drop for LockedRecord {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.sentinel);
	}
}
