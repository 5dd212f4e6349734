mod common;

// crates.io
use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode, header::LOCATION},
	response::Response,
};
use color_eyre::Result;
use httpmock::prelude::*;
use reqwest::Client as ReqwestClient;
use serde_json::Value;
use tower::ServiceExt;
// self
use common::*;
use twitch_api_proxy::{
	config::Config,
	credential::{CredentialManager, CredentialState},
	forward::Forwarder,
	server::{self, AppState},
	setup::AuthorizationSession,
};

const STATE: &str = "expected-state";

fn app(config: Config) -> Result<(Router, Arc<CredentialManager>)> {
	let manager = build_manager(config);
	let client = ReqwestClient::builder()
		.danger_accept_invalid_certs(true)
		.build()
		.expect("Failed to build reqwest client for tests.");
	let forwarder = Forwarder::with_client(client, manager.config(), manager.store());
	let session = AuthorizationSession::with_state(manager.config(), STATE)?;
	let state = AppState::with_parts(Arc::clone(&manager), forwarder, session);

	Ok((server::router(state), manager))
}

async fn get(router: Router, uri: &str) -> Result<Response> {
	let request = Request::builder().uri(uri).body(Body::empty())?;

	Ok(router.oneshot(request).await?)
}

async fn json_body(response: Response) -> Result<Value> {
	let bytes = body::to_bytes(response.into_body(), usize::MAX).await?;

	Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn unknown_paths_answer_not_found() -> Result<()> {
	let (router, _) = app(base_config())?;

	assert_eq!(get(router.clone(), "/unknown").await?.status(), StatusCode::NOT_FOUND);
	assert_eq!(get(router.clone(), "/GET/unknown/users").await?.status(), StatusCode::NOT_FOUND);
	assert_eq!(get(router, "/").await?.status(), StatusCode::NOT_FOUND);

	Ok(())
}

#[tokio::test]
async fn authorize_route_redirects_to_the_identity_provider() -> Result<()> {
	let (router, _) = app(base_config())?;
	let response = get(router, "/auth/twitch").await?;

	assert_eq!(response.status(), StatusCode::SEE_OTHER);

	let location = response
		.headers()
		.get(LOCATION)
		.and_then(|value| value.to_str().ok())
		.expect("Redirect should carry a Location header.");
	let url = parse_url(location);
	let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();

	assert!(location.starts_with("https://id.twitch.tv/oauth2/authorize?"));
	assert!(pairs.contains(&("client_id".into(), CLIENT_ID.into())));
	assert!(pairs.contains(&("response_type".into(), "code".into())));
	assert!(pairs.contains(&("state".into(), STATE.into())));
	assert!(
		pairs.contains(&(
			"redirect_uri".into(),
			"http://localhost:3000/auth/twitch/callback".into()
		))
	);

	Ok(())
}

#[tokio::test]
async fn callback_rejects_unknown_state() -> Result<()> {
	let (router, manager) = app(base_config())?;
	let response = get(router, "/auth/twitch/callback?code=abc&state=forged").await?;

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(json_body(response).await?, serde_json::json!({ "error": "Invalid state" }));
	assert_eq!(manager.state(), CredentialState::Unauthenticated);

	Ok(())
}

#[tokio::test]
async fn callback_surfaces_provider_errors() -> Result<()> {
	let (router, _) = app(base_config())?;
	let response = get(
		router,
		&format!("/auth/twitch/callback?error=access_denied&error_description=denied&state={STATE}"),
	)
	.await?;

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let payload = json_body(response).await?;

	assert_eq!(payload["error"], "access_denied");
	assert_eq!(payload["message"], "denied");

	Ok(())
}

#[tokio::test]
async fn callback_requires_a_code() -> Result<()> {
	let (router, _) = app(base_config())?;
	let response = get(router, &format!("/auth/twitch/callback?state={STATE}")).await?;

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	Ok(())
}

#[tokio::test]
async fn callback_exchanges_the_code_and_adopts_the_token() -> Result<()> {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(token_body("access-setup", Some("setup-refresh"), 14_400));
		})
		.await;
	let (router, manager) = app(config_for(&server).with_refresh_token(""))?;

	assert!(!manager.has_refresh_token());

	let response = get(router, &format!("/auth/twitch/callback?code=abc&state={STATE}")).await?;

	mock.assert_async().await;

	assert_eq!(response.status(), StatusCode::OK);

	let payload = json_body(response).await?;

	assert_eq!(payload["refresh_token"], "setup-refresh");
	assert_eq!(payload["response"]["access_token"], "access-setup");
	assert!(payload["message"].is_string());
	assert!(manager.has_refresh_token());
	assert_eq!(manager.current_token().expose(), "access-setup");
	assert_eq!(manager.state(), CredentialState::Authenticated);

	manager.stop();

	Ok(())
}

#[tokio::test]
async fn callback_reports_failed_exchanges_as_bad_gateway() -> Result<()> {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"status":400,"message":"Invalid authorization code"}"#);
		})
		.await;
	let (router, manager) = app(config_for(&server).with_refresh_token(""))?;
	let response = get(router, &format!("/auth/twitch/callback?code=stale&state={STATE}")).await?;

	assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
	assert!(manager.current_token().is_empty());

	Ok(())
}

#[tokio::test]
async fn proxy_routes_forward_to_the_upstream_surface() -> Result<()> {
	let server = MockServer::start_async().await;
	let users = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/helix/users")
				.query_param("login", "alice")
				.header("client-id", CLIENT_ID);
			then.status(200).header("content-type", "application/json").body(r#"{"data":[]}"#);
		})
		.await;
	let clips = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/helix/clips")
				.json_body(serde_json::json!({ "broadcaster_id": "123" }));
			then.status(202).header("content-type", "application/json").body(r#"{"data":[]}"#);
		})
		.await;
	let (router, _) = app(config_for(&server))?;
	let response = get(router.clone(), "/helix/users?login=alice").await?;

	users.assert_async().await;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(json_body(response).await?, serde_json::json!({ "data": [] }));

	let response = get(router, "/POST/helix/clips?body-broadcaster_id=123").await?;

	clips.assert_async().await;

	assert_eq!(response.status(), StatusCode::ACCEPTED);

	Ok(())
}

#[tokio::test]
async fn proxy_routes_answer_bad_gateway_when_upstream_is_unreachable() -> Result<()> {
	let (router, _) = app(base_config().with_upstream_url(parse_url(UNREACHABLE)))?;
	let response = get(router, "/kraken/channels/1").await?;

	assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

	Ok(())
}

#[tokio::test]
async fn bare_surface_prefixes_are_forwarded() -> Result<()> {
	let server = MockServer::start_async().await;
	let helix = server
		.mock_async(|when, then| {
			when.method(GET).path("/helix/");
			then.status(404).header("content-type", "application/json").body("{}");
		})
		.await;
	let kraken = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/kraken/");
			then.status(200).header("content-type", "application/json").body("{}");
		})
		.await;
	let (router, _) = app(config_for(&server))?;
	let response = get(router.clone(), "/helix/").await?;

	helix.assert_async().await;

	assert_eq!(response.status(), StatusCode::NOT_FOUND);

	let response = get(router, "/delete/kraken/").await?;

	kraken.assert_async().await;

	assert_eq!(response.status(), StatusCode::OK);

	Ok(())
}
