//! Credential lifecycle: the cached access token, its renewal, and the refresh task.
//!
//! [`CredentialManager`] is the only writer of the access token. Other components read it
//! through a [`CredentialStore`] handle, which hands out snapshots and never blocks on the
//! network. Renewals are serialized through an async mutex so at most one refresh grant is in
//! flight per manager, and [`CredentialManager::start`] spawns the single [`RefreshTask`] that
//! keeps the token fresh ahead of expiry.

mod metrics;
mod schedule;

pub use self::metrics::RefreshMetrics;
pub use schedule::*;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret, TokenStatus},
	config::Config,
	error::ConfigError,
	http::{ReqwestHttpClient, TokenHttpClient},
	oauth::{IdentityClient, IssuedToken, ReqwestTransportErrorMapper, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Manager specialized for the crate's default reqwest transport stack.
pub type ReqwestCredentialManager =
	CredentialManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Lifecycle state of the managed credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialState {
	/// No refresh has been attempted yet.
	Unauthenticated,
	/// A refresh grant is in flight.
	Refreshing,
	/// The last refresh succeeded.
	Authenticated,
	/// The last refresh failed; the previous token (possibly empty) is still served.
	Stale,
}

/// Read-only view of the cached access token.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
	token: Arc<RwLock<AccessToken>>,
}
impl CredentialStore {
	/// Returns a copy of the current token.
	pub fn snapshot(&self) -> AccessToken {
		self.token.read().clone()
	}

	/// Returns the current access token value; empty before the first successful refresh.
	pub fn current_token(&self) -> TokenSecret {
		self.token.read().value.clone()
	}

	/// Lifecycle status of the cached token at the current instant.
	pub fn status(&self) -> TokenStatus {
		self.token.read().status()
	}

	fn replace(&self, token: AccessToken) {
		*self.token.write() = token;
	}
}

/// Result of a successful refresh grant.
#[derive(Clone, Debug)]
pub struct RefreshOutcome {
	/// Token now held by the store.
	pub token: AccessToken,
	/// Delay until the next scheduled refresh.
	pub refresh_in: Duration,
	/// Whether the provider rotated the refresh token.
	pub rotated: bool,
}

/// Owns the access token and renews it with the refresh-token grant.
pub struct CredentialManager<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: Arc<Config>,
	identity: Arc<IdentityClient<C, M>>,
	store: CredentialStore,
	refresh_token: RwLock<Option<TokenSecret>>,
	state: RwLock<CredentialState>,
	refresh_guard: AsyncMutex<()>,
	metrics: Arc<RefreshMetrics>,
	task: Mutex<Option<RefreshTask>>,
}
impl CredentialManager {
	/// Builds a manager backed by a reqwest transport that never follows redirects.
	pub fn new(config: Arc<Config>) -> Result<Self> {
		Self::with_http_client(config, ReqwestHttpClient::new()?, ReqwestTransportErrorMapper)
	}
}
impl<C, M> CredentialManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a manager that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: Arc<Config>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let identity = IdentityClient::new(
			&config.token_url,
			&config.client_id,
			config.client_secret.expose(),
			http_client,
			mapper,
		)?;
		let refresh_token = config.refresh_token.clone().filter(|token| !token.is_empty());

		Ok(Self {
			identity: Arc::new(identity),
			store: CredentialStore::default(),
			refresh_token: RwLock::new(refresh_token),
			state: RwLock::new(CredentialState::Unauthenticated),
			refresh_guard: AsyncMutex::new(()),
			metrics: Default::default(),
			task: Mutex::new(None),
			config,
		})
	}

	/// Resolved configuration the manager was built from.
	pub fn config(&self) -> &Arc<Config> {
		&self.config
	}

	/// Identity client shared with the setup routes.
	pub fn identity(&self) -> &Arc<IdentityClient<C, M>> {
		&self.identity
	}

	/// Read-only handle to the cached token.
	pub fn store(&self) -> CredentialStore {
		self.store.clone()
	}

	/// Latest cached access token value. Never blocks on the network.
	pub fn current_token(&self) -> TokenSecret {
		self.store.current_token()
	}

	/// Current lifecycle state.
	pub fn state(&self) -> CredentialState {
		*self.state.read()
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &Arc<RefreshMetrics> {
		&self.metrics
	}

	/// Returns `true` when a refresh token is available for the refresh grant.
	pub fn has_refresh_token(&self) -> bool {
		self.refresh_token.read().is_some()
	}

	/// Runs the refresh-token grant and stores the result.
	///
	/// Concurrent calls are serialized. On failure the cached token is left untouched and the
	/// state moves to [`CredentialState::Stale`].
	pub async fn refresh(&self) -> Result<RefreshOutcome> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let _singleflight = self.refresh_guard.lock().await;
				let refresh_token =
					self.refresh_token.read().clone().ok_or(ConfigError::MissingRefreshToken)?;

				self.metrics.record_attempt();
				self.set_state(CredentialState::Refreshing);

				let issued = match self.identity.refresh_token(&refresh_token).await {
					Ok(issued) => issued,
					Err(err) => {
						self.metrics.record_failure();
						self.set_state(CredentialState::Stale);

						return Err(err);
					},
				};
				let rotated = match issued.refresh_token {
					Some(next) if next != refresh_token && !next.is_empty() => {
						*self.refresh_token.write() = Some(next);

						true
					},
					_ => false,
				};
				let refresh_in = issued.access_token.refresh_in();

				self.store.replace(issued.access_token.clone());
				self.metrics.record_success();
				self.set_state(CredentialState::Authenticated);

				tracing::info!(
					expires_in = issued.access_token.expires_in.whole_seconds(),
					rotated,
					"Access token refreshed."
				);
				tracing::debug!(scopes = ?issued.scopes, "Provider reported granted scopes.");

				Ok::<_, Error>(RefreshOutcome { token: issued.access_token, refresh_in, rotated })
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Spawns the refresh task, which refreshes immediately.
	///
	/// Returns `None` when no refresh token is configured (the manager then stays
	/// [`CredentialState::Unauthenticated`]) or when a task started earlier is still running.
	/// Must be called from within a tokio runtime.
	pub fn start(self: &Arc<Self>) -> Option<RefreshTask> {
		self.start_in(Duration::ZERO)
	}

	/// Spawns the refresh task with its first refresh delayed by `delay`.
	pub fn start_in(self: &Arc<Self>, delay: Duration) -> Option<RefreshTask> {
		if !self.has_refresh_token() {
			tracing::warn!(
				"No refresh token is configured; visit /auth/twitch to obtain one. \
				 Upstream calls will carry an empty credential."
			);

			return None;
		}

		let mut slot = self.task.lock();

		if slot.as_ref().is_some_and(|task| !task.is_finished()) {
			return None;
		}

		let task = RefreshTask::spawn(Arc::clone(self), self.config.retry.clone(), delay);

		*slot = Some(task.clone());

		Some(task)
	}

	/// Installs a token obtained outside the refresh grant (the setup callback's code
	/// exchange) and returns the delay until it should be refreshed.
	pub fn adopt(&self, issued: &IssuedToken) -> Duration {
		if let Some(refresh_token) = issued.refresh_token.clone().filter(|token| !token.is_empty()) {
			*self.refresh_token.write() = Some(refresh_token);
		}

		self.store.replace(issued.access_token.clone());
		self.set_state(CredentialState::Authenticated);

		tracing::info!("Adopted the access token issued by the authorization code grant.");

		issued.access_token.refresh_in()
	}

	/// Cancels the refresh task started by [`CredentialManager::start`], if any.
	pub fn stop(&self) {
		if let Some(task) = self.task.lock().take() {
			task.stop();
		}
	}

	fn set_state(&self, state: CredentialState) {
		*self.state.write() = state;
	}
}
impl<C, M> Debug for CredentialManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialManager")
			.field("identity", &self.identity)
			.field("state", &self.state())
			.field("token", &self.store.snapshot())
			.field("refresh_token_set", &self.has_refresh_token())
			.finish()
	}
}
