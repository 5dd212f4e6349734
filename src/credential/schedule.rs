//! Refresh task and retry pacing.

// crates.io
use tokio::task::AbortHandle;
// self
use crate::{
	_prelude::*,
	credential::CredentialManager,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
};

/// Exponential backoff applied to transient refresh failures.
///
/// A zero `initial` delay disables retries: the task stops after the first failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub initial: Duration,
	/// Multiplier applied after every failed retry.
	pub factor: u32,
	/// Upper bound for a single delay.
	pub max: Duration,
}
impl RetryPolicy {
	/// Policy that never retries.
	pub const fn disabled() -> Self {
		Self { initial: Duration::ZERO, factor: 1, max: Duration::ZERO }
	}

	/// Returns `true` when failed refreshes are retried.
	pub fn is_enabled(&self) -> bool {
		self.initial.is_positive()
	}

	/// Starts a fresh backoff sequence.
	pub fn backoff(&self) -> Backoff {
		Backoff { policy: self.clone(), next: self.initial }
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { initial: Duration::seconds(30), factor: 2, max: Duration::minutes(15) }
	}
}

/// Stateful delay sequence produced by a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct Backoff {
	policy: RetryPolicy,
	next: Duration,
}
impl Backoff {
	/// Returns the next delay, or `None` when retries are disabled.
	///
	/// A provider `Retry-After` hint longer than the computed delay wins.
	pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
		if !self.policy.is_enabled() {
			return None;
		}

		let delay = self.next.min(self.policy.max);

		self.next = self
			.next
			.checked_mul(i32::try_from(self.policy.factor.max(1)).unwrap_or(i32::MAX))
			.unwrap_or(self.policy.max)
			.min(self.policy.max);

		Some(hint.map_or(delay, |hint| hint.max(delay)))
	}

	/// Restarts the sequence after a success.
	pub fn reset(&mut self) {
		self.next = self.policy.initial;
	}
}

/// Handle to the background task that keeps the access token fresh.
///
/// Dropping the handle leaves the task running; call [`RefreshTask::stop`] to cancel it.
#[derive(Clone, Debug)]
pub struct RefreshTask {
	handle: AbortHandle,
}
impl RefreshTask {
	/// Spawns the refresh loop on the current tokio runtime.
	pub(crate) fn spawn<C, M>(
		manager: Arc<CredentialManager<C, M>>,
		policy: RetryPolicy,
		delay: Duration,
	) -> Self
	where
		C: ?Sized + TokenHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let handle = tokio::spawn(run(manager, policy, delay)).abort_handle();

		Self { handle }
	}

	/// Cancels the task. In-flight refresh grants are dropped.
	pub fn stop(&self) {
		self.handle.abort();
	}

	/// Returns `true` once the task has stopped, either by cancellation or after a
	/// permanent failure.
	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}
}

async fn run<C, M>(manager: Arc<CredentialManager<C, M>>, policy: RetryPolicy, delay: Duration)
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut backoff = policy.backoff();

	if delay.is_positive() {
		tracing::info!(next_refresh_in = %format_hms(delay), "Next token refresh scheduled.");
		tokio::time::sleep(delay.unsigned_abs()).await;
	}

	loop {
		let delay = match manager.refresh().await {
			Ok(outcome) => {
				backoff.reset();

				tracing::info!(
					next_refresh_in = %format_hms(outcome.refresh_in),
					"Next token refresh scheduled."
				);

				outcome.refresh_in
			},
			Err(err) if err.is_permanent() => {
				tracing::error!(
					error = %err,
					"Token refresh failed permanently; automatic renewal stopped."
				);

				return;
			},
			Err(err) => match backoff.next_delay(err.retry_after()) {
				Some(delay) => {
					tracing::warn!(
						error = %err,
						retry_in = %format_hms(delay),
						"Token refresh failed; retrying."
					);

					delay
				},
				None => {
					tracing::error!(error = %err, "Token refresh failed; automatic renewal stopped.");

					return;
				},
			},
		};

		tokio::time::sleep(delay.unsigned_abs()).await;
	}
}

/// Formats a delay as `HH:MM:SS`.
pub fn format_hms(delay: Duration) -> String {
	let total = delay.whole_seconds().max(0);

	format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}
