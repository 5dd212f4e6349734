//! Shared fixtures for the integration suites.

#![allow(dead_code, unused_imports)]

pub use std::{
	collections::VecDeque,
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};

pub use parking_lot::Mutex;
pub use time::Duration;
pub use twitch_api_proxy::url::Url;

// crates.io
use httpmock::MockServer;
use reqwest::Client as ReqwestClient;
// self
use twitch_api_proxy::{
	config::Config,
	credential::{CredentialManager, RetryPolicy},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
};

pub const CLIENT_ID: &str = "proxy-client";
pub const CLIENT_SECRET: &str = "proxy-secret";
pub const REFRESH_TOKEN: &str = "initial-refresh";
pub const TOKEN_PATH: &str = "/oauth2/token";
pub const UNREACHABLE: &str = "http://127.0.0.1:1";

/// Reqwest client for talking to the local mock server.
pub fn test_reqwest_http_client() -> ReqwestHttpClient {
	let client = ReqwestClient::builder()
		.danger_accept_invalid_certs(true)
		.build()
		.expect("Failed to build reqwest client for tests.");

	ReqwestHttpClient::with_client(client)
}

pub fn parse_url(value: &str) -> Url {
	Url::parse(value).expect("Test URL should parse.")
}

/// Base configuration without endpoints overridden.
pub fn base_config() -> Config {
	Config::new(CLIENT_ID, CLIENT_SECRET)
		.expect("Config fixture should resolve.")
		.with_refresh_token(REFRESH_TOKEN)
		.with_retry(RetryPolicy::disabled())
}

/// Configuration whose token endpoint, authorize endpoint, and upstream all live on `server`.
pub fn config_for(server: &MockServer) -> Config {
	base_config()
		.with_token_url(parse_url(&server.url(TOKEN_PATH)))
		.with_authorize_url(parse_url(&server.url("/oauth2/authorize")))
		.with_upstream_url(parse_url(&server.base_url()))
}

/// Manager wired to the reqwest transport used by the binary.
pub fn build_manager(config: Config) -> Arc<CredentialManager> {
	let manager = CredentialManager::with_http_client(
		Arc::new(config),
		test_reqwest_http_client(),
		ReqwestTransportErrorMapper,
	)
	.expect("Credential manager should build.");

	Arc::new(manager)
}

/// Token endpoint success body in the provider's shape.
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> String {
	let mut body = serde_json::json!({
		"access_token": access,
		"expires_in": expires_in,
		"scope": ["chat:read"],
		"token_type": "bearer",
	});

	if let Some(refresh) = refresh {
		body["refresh_token"] = serde_json::Value::from(refresh);
	}

	body.to_string()
}
