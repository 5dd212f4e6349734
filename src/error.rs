//! Proxy-level error types shared by the credential manager, forwarder, and setup routes.

// self
use crate::_prelude::*;

/// Proxy-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical proxy error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Local I/O failure (listener bind, config file access).
	#[error("Local I/O failure.")]
	Io(#[from] std::io::Error),

	/// Identity provider rejected the grant (bad code or refresh token).
	#[error("Identity provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// OAuth callback carried a `state` that this process never issued.
	#[error("Invalid state")]
	InvalidState,
	/// Outbound method segment is not a valid HTTP token.
	#[error("`{method}` is not a valid HTTP method.")]
	InvalidMethod {
		/// Upper-cased method segment taken from the proxy URL.
		method: String,
	},
}
impl Error {
	/// Returns `true` when retrying the same request cannot succeed without operator action.
	pub fn is_permanent(&self) -> bool {
		matches!(
			self,
			Self::Config(_) | Self::InvalidGrant { .. } | Self::InvalidClient { .. }
		)
	}

	/// Retry-After hint carried by transient token endpoint failures.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Transient(TransientError::TokenEndpoint { retry_after, .. }) => *retry_after,
			_ => None,
		}
	}
}

/// Configuration and validation failures raised by the proxy.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured endpoint is not a valid URL.
	#[error("The {endpoint} endpoint is not a valid URL.")]
	InvalidEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Port lies outside the unprivileged range.
	#[error("Port {port} is not valid; expected a value between 1024 and 65535.")]
	InvalidPort {
		/// Rejected port value.
		port: u32,
	},
	/// Configured scopes cannot be normalized.
	#[error("Configured scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Config file exists but could not be read.
	#[error("Config file {path} could not be read.")]
	ConfigRead {
		/// Path of the config file.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// Config file is not valid JSON for the expected schema.
	#[error("Config file {path} is malformed at `{location}`.")]
	ConfigParse {
		/// Path of the config file.
		path: String,
		/// JSON path of the offending value.
		location: String,
		/// Structured parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// No refresh token is configured, so the refresh grant cannot run.
	#[error("No refresh token is configured.")]
	MissingRefreshToken,
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Identity provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or proxy-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Which remote endpoint was being called.
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[source] std::io::Error),
}
impl TransportError {
	/// Wraps a network error raised while calling the token endpoint.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { target: "the token endpoint", source: Box::new(src) }
	}

	/// Wraps a network error raised while calling the upstream API.
	pub fn upstream(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { target: "the upstream API", source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn permanent_errors_stop_retries() {
		assert!(Error::InvalidGrant { reason: "Invalid refresh token".into() }.is_permanent());
		assert!(Error::from(ConfigError::MissingExpiresIn).is_permanent());
		assert!(!Error::InvalidState.is_permanent());

		let transient = Error::from(TransientError::TokenEndpoint {
			message: "busy".into(),
			status: Some(503),
			retry_after: Some(Duration::seconds(7)),
		});

		assert!(!transient.is_permanent());
		assert_eq!(transient.retry_after(), Some(Duration::seconds(7)));
	}

	#[test]
	fn transport_error_names_its_target() {
		let io = std::io::Error::other("connection reset");
		let err = TransportError::upstream(io);

		assert_eq!(err.to_string(), "Network error occurred while calling the upstream API.");
	}
}
