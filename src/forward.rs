//! Outbound calls to the upstream API.
//!
//! The [`Forwarder`] turns a [`RequestSpec`] into an HTTP request against the upstream origin,
//! attaches the credential headers the target [`Surface`] expects, and relays the upstream
//! status, content type, and body back to the caller unchanged.

// crates.io
use axum::{
	body::{Body, Bytes},
	http::{
		HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
	response::{IntoResponse, Response},
};
// self
use crate::{
	_prelude::*,
	config::Config,
	credential::CredentialStore,
	error::{ConfigError, TransportError},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	server,
	translate::{RequestSpec, Surface},
};

/// `Accept` value pinning the legacy surface to API v5.
pub const KRAKEN_ACCEPT: &str = "application/vnd.twitchtv.v5+json";

// Header names are case-insensitive on the wire; helix documents `Client-Id`, kraken `Client-ID`.
const CLIENT_ID: HeaderName = HeaderName::from_static("client-id");

/// Upstream response relayed verbatim to the caller.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
	/// Upstream status code.
	pub status: StatusCode,
	/// Upstream `Content-Type`, if any.
	pub content_type: Option<HeaderValue>,
	/// Upstream body bytes.
	pub body: Bytes,
}
impl IntoResponse for UpstreamResponse {
	fn into_response(self) -> Response {
		let mut response = Response::new(Body::from(self.body));

		*response.status_mut() = self.status;

		if let Some(content_type) = self.content_type {
			response.headers_mut().insert(CONTENT_TYPE, content_type);
		}

		response
	}
}

/// Issues translated requests against the upstream API with the current credential.
#[derive(Clone, Debug)]
pub struct Forwarder {
	client: ReqwestClient,
	upstream: Url,
	client_id: String,
	store: CredentialStore,
	legacy_transport_errors: bool,
}
impl Forwarder {
	/// Builds a forwarder for the configured upstream origin.
	pub fn new(config: &Config, store: CredentialStore) -> Result<Self> {
		let client = ReqwestClient::builder().build().map_err(ConfigError::from)?;

		Ok(Self::with_client(client, config, store))
	}

	/// Builds a forwarder around an existing reqwest client.
	pub fn with_client(client: ReqwestClient, config: &Config, store: CredentialStore) -> Self {
		Self {
			client,
			upstream: config.upstream_url.clone(),
			client_id: config.client_id.clone(),
			store,
			legacy_transport_errors: config.legacy_transport_errors,
		}
	}

	/// Credential headers for `surface`, carrying the token currently held by the store.
	pub fn headers(&self, surface: Surface) -> HeaderMap {
		let token = self.store.current_token();
		let (scheme, accept) = match surface {
			Surface::Helix => ("Bearer", None),
			Surface::Kraken => ("OAuth", Some(KRAKEN_ACCEPT)),
		};
		let mut headers = HeaderMap::new();

		match HeaderValue::from_str(&format!("{scheme} {}", token.expose())) {
			Ok(mut value) => {
				value.set_sensitive(true);
				headers.insert(AUTHORIZATION, value);
			},
			Err(_) => tracing::warn!("Access token is not a valid header value; sending none."),
		}
		match HeaderValue::from_str(&self.client_id) {
			Ok(value) => {
				headers.insert(CLIENT_ID, value);
			},
			Err(_) => tracing::warn!("Client id is not a valid header value; sending none."),
		}

		if let Some(accept) = accept {
			headers.insert(ACCEPT, HeaderValue::from_static(accept));
		}

		headers
	}

	/// Absolute upstream URL for `spec`.
	pub fn upstream_url(&self, spec: &RequestSpec) -> Url {
		let mut url = self.upstream.clone();
		// Concatenate rather than `Url::join`; a `//host` path must never change the origin.
		let path = format!("{}{}", self.upstream.path().trim_end_matches('/'), spec.path);

		url.set_path(&path);
		url.set_query(None);

		if !spec.query.is_empty() {
			url.query_pairs_mut()
				.extend_pairs(spec.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
		}

		url
	}

	/// Performs the upstream call.
	///
	/// The body is only sent for non-`GET` methods, serialized as JSON.
	pub async fn forward(&self, spec: &RequestSpec, surface: Surface) -> Result<UpstreamResponse> {
		const KIND: FlowKind = FlowKind::Forward;

		let span = FlowSpan::new(KIND, "forward");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let method = Method::from_bytes(spec.method.as_bytes())
					.map_err(|_| Error::InvalidMethod { method: spec.method.clone() })?;
				let url = self.upstream_url(spec);

				tracing::debug!(%method, endpoint = %spec.endpoint(), %surface, "Forwarding request.");

				let mut request = self.client.request(method, url).headers(self.headers(surface));

				if let (true, Some(body)) = (spec.sends_body(), spec.body.as_ref()) {
					request = request
						.header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
						.body(serde_json::to_vec(body).unwrap_or_default());
				}

				let response = request.send().await.map_err(TransportError::upstream)?;
				let status = response.status();
				let content_type = response.headers().get(CONTENT_TYPE).cloned();
				let body = response.bytes().await.map_err(TransportError::upstream)?;

				Ok::<_, Error>(UpstreamResponse { status, content_type, body })
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Performs the upstream call and converts failures into JSON error responses.
	///
	/// Transport failures answer `502`, or `200` when legacy transport errors are enabled.
	pub async fn relay(&self, spec: &RequestSpec, surface: Surface) -> Response {
		match self.forward(spec, surface).await {
			Ok(upstream) => upstream.into_response(),
			Err(err @ Error::InvalidMethod { .. }) =>
				server::json_error(StatusCode::BAD_REQUEST, "Bad Request", &err),
			Err(err) => {
				tracing::warn!(error = %err, endpoint = %spec.endpoint(), "Upstream call failed.");

				let status = if self.legacy_transport_errors {
					StatusCode::OK
				} else {
					StatusCode::BAD_GATEWAY
				};

				server::json_error(status, "Bad Gateway", &err)
			},
		}
	}
}
