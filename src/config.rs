//! Startup configuration: the `config.json` base file plus command-line and environment
//! overrides.
//!
//! Resolution happens once. The resulting [`Config`] is immutable for the lifetime of the
//! process and is shared by reference with the credential manager, the forwarder, and the
//! setup routes.

// std
use std::{
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};
// crates.io
use clap::Parser;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	credential::RetryPolicy,
	error::ConfigError,
};

/// Config file read when `--config` is not given. Its absence is not an error.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
/// Upstream API origin.
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.twitch.tv";
/// Identity provider authorization endpoint.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";
/// Identity provider token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
/// Listen address.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Listen port.
pub const DEFAULT_PORT: u16 = 3000;
/// Path of the OAuth callback route, also embedded in the registered redirect URI.
pub const CALLBACK_PATH: &str = "/auth/twitch/callback";

const MIN_PORT: u32 = 1024;
const MAX_PORT: u32 = 65_535;
const MAX_RETRY_FACTOR: u32 = 1_000;

/// Command-line interface. Every flag falls back to a `TWITCH_*` environment variable and
/// overrides the matching `config.json` key.
#[derive(Clone, Debug, Default, Parser)]
#[command(
	version,
	about = "Forward compact proxy URLs to the Twitch API with a managed OAuth token."
)]
pub struct Cli {
	/// Path of the JSON config file.
	#[arg(long, env = "TWITCH_CONFIG")]
	pub config: Option<PathBuf>,
	/// The port to run on.
	#[arg(long, env = "TWITCH_PORT")]
	pub port: Option<u32>,
	/// Twitch client id.
	#[arg(long, alias = "clientId", env = "TWITCH_CLIENT_ID")]
	pub client_id: Option<String>,
	/// Twitch client secret.
	#[arg(long, alias = "clientSecret", env = "TWITCH_CLIENT_SECRET", hide_env_values = true)]
	pub client_secret: Option<String>,
	/// Scopes requested by the setup flow.
	#[arg(long, num_args = 1.., value_delimiter = ' ', env = "TWITCH_SCOPES")]
	pub scopes: Vec<String>,
	/// Twitch refresh token.
	#[arg(long, alias = "refreshToken", env = "TWITCH_REFRESH_TOKEN", hide_env_values = true)]
	pub refresh_token: Option<String>,
}

/// Refresh retry settings as written in `config.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryFile {
	/// Delay before the first retry; `0` disables retries.
	pub initial_seconds: u64,
	/// Multiplier applied after every failed retry.
	pub factor: u32,
	/// Upper bound for a single delay.
	pub max_seconds: u64,
}
impl Default for RetryFile {
	fn default() -> Self {
		Self { initial_seconds: 30, factor: 2, max_seconds: 900 }
	}
}
impl From<RetryFile> for RetryPolicy {
	fn from(file: RetryFile) -> Self {
		if file.initial_seconds == 0 {
			return RetryPolicy::disabled();
		}

		let seconds = |value: u64| Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX));
		let initial = seconds(file.initial_seconds);

		RetryPolicy {
			initial,
			factor: file.factor.clamp(1, MAX_RETRY_FACTOR),
			max: seconds(file.max_seconds).max(initial),
		}
	}
}

/// Raw contents of `config.json`. Every key is optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
	/// Twitch client id.
	pub client_id: Option<String>,
	/// Twitch client secret.
	pub client_secret: Option<String>,
	/// Refresh token obtained through the setup flow.
	pub refresh_token: Option<String>,
	/// Space-delimited string or array of scopes.
	pub scopes: Option<ScopeSet>,
	/// Listen port.
	pub port: Option<u32>,
	/// Listen address.
	pub host: Option<String>,
	/// Upstream API origin.
	pub upstream_url: Option<String>,
	/// Authorization endpoint.
	pub authorize_url: Option<String>,
	/// Token endpoint.
	pub token_url: Option<String>,
	/// Answer transport failures with `200` instead of `502`.
	pub legacy_transport_errors: Option<bool>,
	/// Refresh retry settings.
	pub retry: Option<RetryFile>,
}
impl ConfigFile {
	/// Reads and parses a config file.
	pub fn read(path: &Path) -> Result<Self, ConfigError> {
		let raw = fs::read_to_string(path).map_err(|source| ConfigError::ConfigRead {
			path: path.display().to_string(),
			source,
		})?;

		Self::parse(&path.display().to_string(), &raw)
	}

	/// Reads a config file, treating a missing file as empty.
	pub fn read_optional(path: &Path) -> Result<Self, ConfigError> {
		match fs::read_to_string(path) {
			Ok(raw) => Self::parse(&path.display().to_string(), &raw),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
			Err(source) => Err(ConfigError::ConfigRead { path: path.display().to_string(), source }),
		}
	}

	/// Parses config JSON, reporting the JSON path of any offending value.
	pub fn parse(path: &str, raw: &str) -> Result<Self, ConfigError> {
		let deserializer = &mut serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(deserializer).map_err(|err| ConfigError::ConfigParse {
			path: path.to_owned(),
			location: err.path().to_string(),
			source: err.into_inner(),
		})
	}

	/// Applies command-line/environment overrides on top of the file values.
	pub fn merge(mut self, cli: &Cli) -> Result<Self, ConfigError> {
		if let Some(port) = cli.port {
			self.port = Some(port);
		}
		if let Some(client_id) = &cli.client_id {
			self.client_id = Some(client_id.clone());
		}
		if let Some(client_secret) = &cli.client_secret {
			self.client_secret = Some(client_secret.clone());
		}
		if !cli.scopes.is_empty() {
			self.scopes = Some(ScopeSet::new(cli.scopes.iter().cloned())?);
		}
		if let Some(refresh_token) = &cli.refresh_token {
			self.refresh_token = Some(refresh_token.clone());
		}

		Ok(self)
	}

	/// Validates the values and fills in defaults.
	pub fn resolve(self) -> Result<Config, ConfigError> {
		let endpoint = |endpoint: &'static str, value: Option<String>, default: &str| {
			Url::parse(value.as_deref().unwrap_or(default))
				.map_err(|source| ConfigError::InvalidEndpoint { endpoint, source })
		};

		Ok(Config {
			client_id: self.client_id.unwrap_or_default(),
			client_secret: TokenSecret::new(self.client_secret.unwrap_or_default()),
			refresh_token: self.refresh_token.filter(|token| !token.is_empty()).map(TokenSecret::new),
			scopes: self.scopes.unwrap_or_default(),
			host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_owned()),
			port: self.port.map(validate_port).transpose()?.unwrap_or(DEFAULT_PORT),
			upstream_url: endpoint("upstream", self.upstream_url, DEFAULT_UPSTREAM_URL)?,
			authorize_url: endpoint("authorize", self.authorize_url, DEFAULT_AUTHORIZE_URL)?,
			token_url: endpoint("token", self.token_url, DEFAULT_TOKEN_URL)?,
			legacy_transport_errors: self.legacy_transport_errors.unwrap_or_default(),
			retry: self.retry.unwrap_or_default().into(),
		})
	}
}

/// Resolved, validated configuration.
#[derive(Clone, Debug)]
pub struct Config {
	/// Twitch client id, sent as `Client-Id` and with every grant.
	pub client_id: String,
	/// Twitch client secret.
	pub client_secret: TokenSecret,
	/// Refresh token; `None` until the setup flow has been completed once.
	pub refresh_token: Option<TokenSecret>,
	/// Scopes requested by the setup flow.
	pub scopes: ScopeSet,
	/// Listen address.
	pub host: String,
	/// Listen port, within `1024..=65535`.
	pub port: u16,
	/// Upstream API origin.
	pub upstream_url: Url,
	/// Authorization endpoint used by the setup redirect.
	pub authorize_url: Url,
	/// Token endpoint used by both grants.
	pub token_url: Url,
	/// Answer transport failures with `200` instead of `502`.
	pub legacy_transport_errors: bool,
	/// Backoff for transient refresh failures.
	pub retry: RetryPolicy,
}
impl Config {
	/// Creates a configuration with default endpoints and port for the given client.
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
	) -> Result<Self, ConfigError> {
		ConfigFile {
			client_id: Some(client_id.into()),
			client_secret: Some(client_secret.into()),
			..Default::default()
		}
		.resolve()
	}

	/// Loads `config.json` (or the `--config` path) and applies the overrides from `cli`.
	pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
		let file = match &cli.config {
			Some(path) => ConfigFile::read(path)?,
			None => ConfigFile::read_optional(Path::new(DEFAULT_CONFIG_PATH))?,
		};

		file.merge(cli)?.resolve()
	}

	/// Sets the refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(refresh_token)).filter(|token| !token.is_empty());

		self
	}

	/// Sets the scopes requested by the setup flow.
	pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Sets the listen port after validating its range.
	pub fn with_port(mut self, port: u32) -> Result<Self, ConfigError> {
		self.port = validate_port(port)?;

		Ok(self)
	}

	/// Points the forwarder at another upstream origin.
	pub fn with_upstream_url(mut self, url: Url) -> Self {
		self.upstream_url = url;

		self
	}

	/// Points the setup redirect at another authorization endpoint.
	pub fn with_authorize_url(mut self, url: Url) -> Self {
		self.authorize_url = url;

		self
	}

	/// Points both grants at another token endpoint.
	pub fn with_token_url(mut self, url: Url) -> Self {
		self.token_url = url;

		self
	}

	/// Enables or disables `200` answers for transport failures.
	pub fn with_legacy_transport_errors(mut self, enabled: bool) -> Self {
		self.legacy_transport_errors = enabled;

		self
	}

	/// Replaces the refresh retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Redirect URI registered with the identity provider:
	/// `http://localhost:<port>/auth/twitch/callback`.
	pub fn redirect_uri(&self) -> Result<Url, ConfigError> {
		Url::parse(&format!("http://localhost:{}{CALLBACK_PATH}", self.port))
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "redirect", source })
	}
}

fn validate_port(port: u32) -> Result<u16, ConfigError> {
	if !(MIN_PORT..=MAX_PORT).contains(&port) {
		return Err(ConfigError::InvalidPort { port });
	}

	u16::try_from(port).map_err(|_| ConfigError::InvalidPort { port })
}
