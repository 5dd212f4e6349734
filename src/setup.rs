//! One-time OAuth setup: send the operator to the authorize endpoint, then trade the returned
//! code for the refresh token that goes into `config.json`.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	config::Config,
	http::TokenHttpClient,
	oauth::{IdentityClient, IssuedToken, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const STATE_LEN: usize = 30;

/// Anti-forgery state plus the URLs of the authorization redirect.
///
/// One session lives for the whole process; every redirect carries the same `state`.
#[derive(Clone)]
pub struct AuthorizationSession {
	state: String,
	state_digest: Vec<u8>,
	scopes: ScopeSet,
	redirect_uri: Url,
	authorize_url: Url,
}
impl AuthorizationSession {
	/// Creates a session with a fresh 30-character URL-safe state.
	pub fn new(config: &Config) -> Result<Self> {
		Self::with_state(config, random_state())
	}

	/// Creates a session with a caller-chosen state.
	pub fn with_state(config: &Config, state: impl Into<String>) -> Result<Self> {
		let state = state.into();
		let redirect_uri = config.redirect_uri()?;
		let authorize_url = build_authorize_url(config, &redirect_uri, &state);

		Ok(Self {
			state_digest: digest(&state),
			state,
			scopes: config.scopes.clone(),
			redirect_uri,
			authorize_url,
		})
	}

	/// Opaque state value that must round-trip via the callback.
	pub fn state(&self) -> &str {
		&self.state
	}

	/// Scopes requested by the redirect.
	pub fn scopes(&self) -> &ScopeSet {
		&self.scopes
	}

	/// Callback URL registered with the identity provider.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Fully-formed authorize URL the operator is redirected to.
	pub fn authorize_url(&self) -> &Url {
		&self.authorize_url
	}

	/// Validates the `state` returned to the callback.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		// Compare digests so the check does not short-circuit on the first differing byte.
		if digest(returned_state) == self.state_digest {
			Ok(())
		} else {
			Err(Error::InvalidState)
		}
	}

	/// Validates `state`, then exchanges `code` for tokens.
	pub async fn complete<C, M>(
		&self,
		identity: &IdentityClient<C, M>,
		code: &str,
		state: &str,
	) -> Result<SetupOutcome>
	where
		C: ?Sized + TokenHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		self.validate_state(state)?;

		let span = FlowSpan::new(KIND, "complete");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(identity.exchange_code(code, &self.redirect_uri)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		let (issued, response) = result?;

		Ok(SetupOutcome { issued, response })
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("state", &"<redacted>")
			.field("scopes", &self.scopes)
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url.origin().ascii_serialization())
			.finish()
	}
}

/// Result of the authorization code exchange.
#[derive(Clone, Debug)]
pub struct SetupOutcome {
	/// Token issued by the exchange.
	pub issued: IssuedToken,
	/// Full provider response.
	pub response: Value,
}
impl SetupOutcome {
	/// JSON shown to the operator: the refresh token to copy into `config.json` and the full
	/// provider response.
	pub fn to_json(&self) -> Value {
		serde_json::json!({
			"message": "Copy refresh_token into the refreshToken field of config.json and restart this service.",
			"refresh_token": self.issued.refresh_token.as_ref().map(|token| token.expose()),
			"response": self.response,
		})
	}
}

fn build_authorize_url(config: &Config, redirect_uri: &Url, state: &str) -> Url {
	let mut url = config.authorize_url.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("client_id", &config.client_id);
	pairs.append_pair("redirect_uri", redirect_uri.as_str());
	pairs.append_pair("response_type", "code");
	pairs.append_pair("scope", &config.scopes.normalized());
	pairs.append_pair("state", state);

	drop(pairs);

	url
}

fn random_state() -> String {
	let bytes: [u8; 24] = rand::random();
	let mut state = URL_SAFE_NO_PAD.encode(bytes);

	state.truncate(STATE_LEN);

	state
}

fn digest(value: &str) -> Vec<u8> {
	Sha256::digest(value.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn config() -> Config {
		Config::new("client", "secret")
			.and_then(|config| config.with_port(4000))
			.expect("Config fixture should be valid.")
			.with_scopes(ScopeSet::new(["chat:read", "bits:read"]).expect("Scopes should be valid."))
	}

	#[test]
	fn random_state_is_url_safe_and_fixed_length() {
		let state = random_state();

		assert_eq!(state.len(), STATE_LEN);
		assert!(state.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
		assert_ne!(state, random_state());
	}

	#[test]
	fn authorize_url_carries_every_parameter() {
		let session = AuthorizationSession::with_state(&config(), "expected")
			.expect("Session should build.");
		let pairs = session.authorize_url().query_pairs().into_owned().collect::<Vec<_>>();

		assert!(session.authorize_url().as_str().starts_with("https://id.twitch.tv/oauth2/authorize?"));
		assert_eq!(
			pairs,
			vec![
				("client_id".into(), "client".into()),
				("redirect_uri".into(), "http://localhost:4000/auth/twitch/callback".into()),
				("response_type".into(), "code".into()),
				("scope".into(), "bits:read chat:read".into()),
				("state".into(), "expected".into()),
			]
		);
	}

	#[test]
	fn state_validation_errors_on_mismatch() {
		let session = AuthorizationSession::with_state(&config(), "expected")
			.expect("Session should build.");

		assert!(session.validate_state("expected").is_ok());
		assert!(matches!(session.validate_state("other"), Err(Error::InvalidState)));
		assert!(matches!(session.validate_state(""), Err(Error::InvalidState)));
	}

	#[test]
	fn debug_output_hides_state() {
		let session = AuthorizationSession::with_state(&config(), "very-secret-state")
			.expect("Session should build.");

		assert!(!format!("{session:?}").contains("very-secret-state"));
	}
}
