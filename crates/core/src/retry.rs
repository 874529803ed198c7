//! Bounded retry with a fixed interval.

use std::future::Future;
use std::time::Duration;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub interval: Duration,
}

impl RetryPolicy {
	pub const fn new(max_attempts: u32, interval: Duration) -> Self {
		Self {
			max_attempts,
			interval,
		}
	}

	/// Boot polling: 120 probes, 5 s apart.
	pub const BOOT: Self = Self::new(120, Duration::from_millis(5000));

	/// Probing that a freshly started capture has created its file.
	pub const CAPTURE_FILE: Self = Self::new(10, Duration::from_millis(1000));

	/// Waiting for another process to release the registry lock.
	pub const REGISTRY_CONTENTION: Self = Self::new(100, Duration::from_millis(100));

	/// Single attempt.
	pub const ONCE: Self = Self::new(1, Duration::ZERO);
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(10, Duration::from_millis(1000))
	}
}

/// Calls `op` until it succeeds or `policy.max_attempts` calls have failed.
///
/// Sleeps `policy.interval` between attempts, never after the last one.
/// Returns the last error on exhaustion. A policy of zero attempts is treated
/// as one.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, op: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	retry_while(policy, op, |_| true).await
}

/// Like [`retry`], but gives up immediately on errors for which
/// `should_retry` returns `false`.
pub async fn retry_while<T, E, F, Fut, P>(
	policy: RetryPolicy,
	mut op: F,
	should_retry: P,
) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	P: Fn(&E) -> bool,
{
	let attempts = policy.max_attempts.max(1);
	let mut attempt = 1;

	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(e) if attempt >= attempts || !should_retry(&e) => return Err(e),
			Err(_) => {
				attempt += 1;
				tokio::time::sleep(policy.interval).await;
			}
		}
	}
}
