//! HTTP surface: proxy routes and the OAuth setup routes.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /helix/*`, `GET /{method}/helix/*` | forward with helix headers |
//! | `GET /kraken/*`, `GET /{method}/kraken/*` | forward with kraken headers |
//! | `GET /auth/twitch` | redirect to the authorize endpoint |
//! | `GET /auth/twitch/callback` | validate `state`, exchange the code |
//!
//! The bare `/helix/` and `/kraken/` prefixes are routed too. Anything else answers `404`.

// crates.io
use axum::{
	Json, Router,
	extract::{Query, State},
	http::{StatusCode, Uri},
	response::{IntoResponse, Redirect, Response},
	routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
// self
use crate::{
	_prelude::*,
	config::CALLBACK_PATH,
	credential::CredentialManager,
	forward::Forwarder,
	setup::AuthorizationSession,
	translate::{self, Surface},
};

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
	manager: Arc<CredentialManager>,
	forwarder: Forwarder,
	session: Arc<AuthorizationSession>,
}
impl AppState {
	/// Builds the forwarder and the setup session from the manager's configuration.
	pub fn new(manager: Arc<CredentialManager>) -> Result<Self> {
		let forwarder = Forwarder::new(manager.config(), manager.store())?;
		let session = AuthorizationSession::new(manager.config())?;

		Ok(Self::with_parts(manager, forwarder, session))
	}

	/// Assembles state from pre-built parts.
	pub fn with_parts(
		manager: Arc<CredentialManager>,
		forwarder: Forwarder,
		session: AuthorizationSession,
	) -> Self {
		Self { manager, forwarder, session: Arc::new(session) }
	}

	/// Credential manager backing the proxy.
	pub fn manager(&self) -> &Arc<CredentialManager> {
		&self.manager
	}

	/// Setup session holding the process-wide `state`.
	pub fn session(&self) -> &AuthorizationSession {
		&self.session
	}
}

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
	code: Option<String>,
	state: Option<String>,
	error: Option<String>,
	error_description: Option<String>,
}

/// Builds the proxy router.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/helix/", get(proxy_helix))
		.route("/helix/{*rest}", get(proxy_helix))
		.route("/kraken/", get(proxy_kraken))
		.route("/kraken/{*rest}", get(proxy_kraken))
		.route("/{method}/helix/", get(proxy_helix))
		.route("/{method}/helix/{*rest}", get(proxy_helix))
		.route("/{method}/kraken/", get(proxy_kraken))
		.route("/{method}/kraken/{*rest}", get(proxy_kraken))
		.route("/auth/twitch", get(authorize))
		.route(CALLBACK_PATH, get(callback))
		.with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(manager: Arc<CredentialManager>) -> Result<()> {
	let config = Arc::clone(manager.config());
	let state = AppState::new(manager)?;
	let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

	tracing::info!(address = %listener.local_addr()?, "Proxy is listening.");
	tracing::info!(
		redirect_uri = %state.session().redirect_uri(),
		"Visit /auth/twitch to obtain a refresh token."
	);

	axum::serve(listener, router(state)).with_graceful_shutdown(shutdown_signal()).await?;

	Ok(())
}

/// JSON error payload: `{"error": ..., "message": ...}`.
pub fn json_error(status: StatusCode, error: &str, message: impl Display) -> Response {
	(status, Json(json!({ "error": error, "message": message.to_string() }))).into_response()
}

async fn proxy_helix(State(state): State<AppState>, uri: Uri) -> Response {
	proxy(&state, &uri, Surface::Helix).await
}

async fn proxy_kraken(State(state): State<AppState>, uri: Uri) -> Response {
	proxy(&state, &uri, Surface::Kraken).await
}

async fn proxy(state: &AppState, uri: &Uri, surface: Surface) -> Response {
	let spec = translate::translate(uri.path(), uri.query());

	state.forwarder.relay(&spec, surface).await
}

async fn authorize(State(state): State<AppState>) -> Redirect {
	Redirect::to(state.session.authorize_url().as_str())
}

async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Response {
	let returned_state = query.state.unwrap_or_default();

	if let Err(err) = state.session.validate_state(&returned_state) {
		tracing::warn!("OAuth callback carried an unknown state.");

		return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response();
	}
	if let Some(error) = query.error {
		return json_error(
			StatusCode::BAD_REQUEST,
			&error,
			query.error_description.unwrap_or_default(),
		);
	}

	let Some(code) = query.code else {
		return json_error(StatusCode::BAD_REQUEST, "Bad Request", "Missing authorization code.");
	};

	match state.session.complete(state.manager.identity().as_ref(), &code, &returned_state).await {
		Ok(outcome) => {
			let delay = state.manager.adopt(&outcome.issued);

			state.manager.start_in(delay);

			Json(outcome.to_json()).into_response()
		},
		Err(err) => {
			tracing::warn!(error = %err, "Authorization code exchange failed.");

			json_error(StatusCode::BAD_GATEWAY, "Bad Gateway", &err)
		},
	}
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %err, "Failed to listen for the shutdown signal.");
	}
}
