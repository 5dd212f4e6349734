//! OAuth client facade for the identity provider's token endpoint.
//!
//! Twitch answers the refresh and authorization-code grants with a payload that differs from
//! RFC 6749 in one detail: `scope` is a JSON array instead of a space-delimited string. The
//! [`TwitchTokenResponse`] type accepts both shapes so the stock `oauth2` request builders can
//! be reused unchanged.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AccessToken as OAuthAccessToken, AuthType, AuthorizationCode, Client, ClientId, ClientSecret,
	EndpointNotSet, EndpointSet, HttpClientError, RedirectUrl, RefreshToken, RequestTokenError,
	Scope, StandardRevocableToken, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError,
		BasicRevocationErrorResponse, BasicTokenIntrospectionResponse, BasicTokenType,
	},
};
use serde::Deserializer;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};

type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;
type ConfiguredClient = Client<
	BasicErrorResponse,
	TwitchTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// OAuth 2.0 grants issued against the identity provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrantType {
	/// Authorization Code grant used by the setup flow.
	AuthorizationCode,
	/// Refresh Token grant used by the credential manager.
	RefreshToken,
}
impl GrantType {
	/// Returns the RFC 6749 identifier for the grant type.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::RefreshToken => "refresh_token",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Maps HTTP transport failures into proxy [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a proxy error.
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(grant, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_unknown_transport_error(meta),
		}
	}
}

/// Token endpoint payload as returned by the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwitchTokenResponse {
	access_token: OAuthAccessToken,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<RefreshToken>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	expires_in: Option<u64>,
	#[serde(
		default,
		rename = "scope",
		deserialize_with = "deserialize_scopes",
		skip_serializing_if = "Option::is_none"
	)]
	scopes: Option<Vec<Scope>>,
	token_type: BasicTokenType,
}
impl TokenResponse for TwitchTokenResponse {
	type TokenType = BasicTokenType;

	fn access_token(&self) -> &OAuthAccessToken {
		&self.access_token
	}

	fn token_type(&self) -> &Self::TokenType {
		&self.token_type
	}

	fn expires_in(&self) -> Option<std::time::Duration> {
		self.expires_in.map(std::time::Duration::from_secs)
	}

	fn refresh_token(&self) -> Option<&RefreshToken> {
		self.refresh_token.as_ref()
	}

	fn scopes(&self) -> Option<&Vec<Scope>> {
		self.scopes.as_ref()
	}
}

/// Token issued by a successful grant.
#[derive(Clone, Debug)]
pub struct IssuedToken {
	/// Access token snapshot stamped with the local issue instant.
	pub access_token: AccessToken,
	/// Refresh token, when the provider returned one (it may rotate on every refresh).
	pub refresh_token: Option<TokenSecret>,
	/// Scopes the provider reports as granted.
	pub scopes: Vec<String>,
}

/// Token endpoint client shared by the credential manager and the setup routes.
pub struct IdentityClient<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredClient,
	client_id: String,
	token_endpoint: Url,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> IdentityClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a client that authenticates with `client_secret` sent in the request body.
	pub fn new(
		token_endpoint: &Url,
		client_id: &str,
		client_secret: &str,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "token", source })?;
		let oauth_client = Client::new(ClientId::new(client_id.to_owned()))
			.set_client_secret(ClientSecret::new(client_secret.to_owned()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self {
			oauth_client,
			client_id: client_id.to_owned(),
			token_endpoint: token_endpoint.clone(),
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
		})
	}

	/// Runs the refresh-token grant.
	pub fn refresh_token<'a>(
		&'a self,
		refresh_token: &'a TokenSecret,
	) -> FacadeFuture<'a, IssuedToken> {
		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(
						GrantType::RefreshToken,
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;

			map_token_response(&response)
		})
	}

	/// Exchanges an authorization code, returning the issued token and the raw payload.
	pub fn exchange_code<'a>(
		&'a self,
		code: &'a str,
		redirect_uri: &'a Url,
	) -> FacadeFuture<'a, (IssuedToken, serde_json::Value)> {
		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "redirect", source })?;
			let response = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url))
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(
						GrantType::AuthorizationCode,
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;
			let issued = map_token_response(&response)?;
			let raw = serde_json::to_value(&response).unwrap_or(serde_json::Value::Null);

			Ok((issued, raw))
		})
	}
}
impl<C, M> Debug for IdentityClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdentityClient")
			.field("client_id", &self.client_id)
			.field("token_endpoint", &self.token_endpoint.as_str())
			.finish()
	}
}

fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Option<Vec<Scope>>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum RawScopes {
		Delimited(String),
		List(Vec<String>),
	}

	Ok(Option::<RawScopes>::deserialize(deserializer)?.map(|raw| match raw {
		RawScopes::Delimited(value) =>
			value.split_whitespace().map(|scope| Scope::new(scope.to_owned())).collect(),
		RawScopes::List(values) => values.into_iter().map(Scope::new).collect(),
	}))
}

fn map_token_response(response: &TwitchTokenResponse) -> Result<IssuedToken> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let issued_at = OffsetDateTime::now_utc();
	let expires_in = Duration::seconds(expires_in);

	// The expiry instant must be representable for status checks.
	issued_at.checked_add(expires_in).ok_or(ConfigError::ExpiresInOutOfRange)?;

	let access_token =
		AccessToken::issued(response.access_token().secret().to_owned(), issued_at, expires_in);
	let refresh_token =
		response.refresh_token().map(|token| TokenSecret::new(token.secret().to_owned()));
	let scopes = response
		.scopes()
		.map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
		.unwrap_or_default();

	Ok(IssuedToken { access_token, refresh_token, scopes })
}

fn map_request_error<E, M>(
	grant: GrantType,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(response, meta_ref),
		RequestTokenError::Request(error) => mapper.map_transport_error(grant, meta_ref, error),
		RequestTokenError::Parse(error, body) =>
			map_twitch_error_body(&body, meta_ref).unwrap_or_else(|| {
				TransientError::TokenResponseParse { source: error, status: meta_status(meta_ref) }
					.into()
			}),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(response: BasicErrorResponse, meta: Option<&ResponseMetadata>) -> Error {
	let message = match response.error_description() {
		Some(description) => description.clone(),
		None => response.error().as_ref().to_owned(),
	};

	match response.error() {
		BasicErrorResponseType::InvalidGrant => Error::InvalidGrant { reason: message },
		BasicErrorResponseType::InvalidClient | BasicErrorResponseType::UnauthorizedClient =>
			Error::InvalidClient { reason: message },
		_ => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

/// Twitch reports token endpoint failures as `{"status": 400, "message": "..."}` rather than
/// the RFC 6749 error object, so `oauth2` surfaces them as parse failures.
fn map_twitch_error_body(body: &[u8], meta: Option<&ResponseMetadata>) -> Option<Error> {
	#[derive(Deserialize)]
	struct TwitchErrorBody {
		status: Option<u16>,
		message: String,
	}

	let parsed = serde_json::from_slice::<TwitchErrorBody>(body).ok()?;
	let status = meta_status(meta).or(parsed.status)?;

	match status {
		400 => Some(Error::InvalidGrant { reason: parsed.message }),
		401 | 403 => Some(Error::InvalidClient { reason: parsed.message }),
		code if code >= 400 => Some(
			TransientError::TokenEndpoint {
				message: parsed.message,
				status: Some(code),
				retry_after: meta_retry_after(meta),
			}
			.into(),
		),
		_ => None,
	}
}

fn map_reqwest_error(grant: GrantType, meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: format!("Request timed out during the {grant} grant"),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error occurred while calling the token endpoint: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn map_unknown_transport_error(meta: Option<&ResponseMetadata>) -> Error {
	TransientError::TokenEndpoint {
		message: "HTTP client error occurred while calling the token endpoint".into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn token_response_accepts_scope_arrays() {
		let response: TwitchTokenResponse = serde_json::from_str(
			r#"{"access_token":"a","refresh_token":"r","expires_in":14400,"scope":["chat:read","chat:edit"],"token_type":"bearer"}"#,
		)
		.expect("Twitch-shaped token responses should deserialize.");
		let issued = map_token_response(&response).expect("Token response should map.");

		assert_eq!(issued.access_token.value.expose(), "a");
		assert_eq!(issued.access_token.expires_in, Duration::seconds(14_400));
		assert_eq!(issued.refresh_token.as_ref().map(TokenSecret::expose), Some("r"));
		assert_eq!(issued.scopes, vec!["chat:read".to_owned(), "chat:edit".to_owned()]);
	}

	#[test]
	fn token_response_accepts_delimited_scope_and_missing_refresh() {
		let response: TwitchTokenResponse = serde_json::from_str(
			r#"{"access_token":"a","expires_in":60,"scope":"chat:read chat:edit","token_type":"bearer"}"#,
		)
		.expect("RFC-shaped token responses should deserialize.");
		let issued = map_token_response(&response).expect("Token response should map.");

		assert!(issued.refresh_token.is_none());
		assert_eq!(issued.scopes.len(), 2);
	}

	#[test]
	fn token_response_requires_positive_expiry() {
		let missing: TwitchTokenResponse =
			serde_json::from_str(r#"{"access_token":"a","token_type":"bearer"}"#)
				.expect("Responses without expires_in should still deserialize.");
		let zero: TwitchTokenResponse =
			serde_json::from_str(r#"{"access_token":"a","expires_in":0,"token_type":"bearer"}"#)
				.expect("Responses with a zero expiry should still deserialize.");

		assert!(matches!(
			map_token_response(&missing),
			Err(Error::Config(ConfigError::MissingExpiresIn))
		));
		assert!(matches!(
			map_token_response(&zero),
			Err(Error::Config(ConfigError::NonPositiveExpiresIn))
		));
	}

	#[test]
	fn token_response_rejects_unrepresentable_expiry() {
		let huge: TwitchTokenResponse = serde_json::from_str(
			r#"{"access_token":"a","expires_in":9000000000000000000,"token_type":"bearer"}"#,
		)
		.expect("Responses with a huge expiry should still deserialize.");

		assert!(matches!(
			map_token_response(&huge),
			Err(Error::Config(ConfigError::ExpiresInOutOfRange))
		));
	}

	#[test]
	fn twitch_error_bodies_are_classified() {
		let meta = ResponseMetadata { status: Some(400), retry_after: None };
		let err = map_twitch_error_body(
			br#"{"status":400,"message":"Invalid refresh token"}"#,
			Some(&meta),
		)
		.expect("Twitch error bodies should be recognized.");

		assert!(matches!(err, Error::InvalidGrant { ref reason } if reason == "Invalid refresh token"));

		let err = map_twitch_error_body(br#"{"status":503,"message":"busy"}"#, None)
			.expect("Status embedded in the body should be used when metadata is missing.");

		assert!(matches!(err, Error::Transient(TransientError::TokenEndpoint { status: Some(503), .. })));
		assert!(map_twitch_error_body(b"<html>", Some(&meta)).is_none());
	}

	#[test]
	fn builds_client_for_token_endpoint() {
		let endpoint =
			Url::parse("https://id.twitch.tv/oauth2/token").expect("Token endpoint should parse.");
		let client = <IdentityClient>::new(
			&endpoint,
			"client-id",
			"client-secret",
			Arc::new(ReqwestHttpClient::default()),
			Arc::new(ReqwestTransportErrorMapper),
		);

		assert!(client.is_ok());
	}
}
