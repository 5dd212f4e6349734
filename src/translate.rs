//! Translation of compact proxy URLs into upstream request specifications.
//!
//! The proxy URL grammar is `[/<METHOD>]/<surface>/<upstream-path>[?<query>]`. Query keys that
//! start with [`BODY_PREFIX`] are diverted into a JSON body; everything else is passed through
//! as the outbound query. Translation is total: every input yields a [`RequestSpec`].

// crates.io
use serde_json::{Map, Value};
use url::form_urlencoded::{self, Serializer};
// self
use crate::_prelude::*;

/// Query-key prefix that moves a parameter into the JSON body.
pub const BODY_PREFIX: &str = "body-";

/// Upstream API variants, each with its own header convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
	/// Current API: `Authorization: Bearer`.
	Helix,
	/// Legacy v5 API: `Authorization: OAuth` plus a versioned `Accept` header.
	Kraken,
}
impl Surface {
	/// Path segment naming the surface.
	pub const fn as_str(self) -> &'static str {
		match self {
			Surface::Helix => "helix",
			Surface::Kraken => "kraken",
		}
	}

	/// Matches a path segment against the surface tokens (case-sensitive).
	pub fn from_segment(segment: &str) -> Option<Self> {
		match segment {
			"helix" => Some(Surface::Helix),
			"kraken" => Some(Surface::Kraken),
			_ => None,
		}
	}
}
impl Display for Surface {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Normalized, upstream-ready representation of an inbound proxy request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
	/// Upper-cased HTTP verb; `GET` unless the URL carried an explicit method segment.
	pub method: String,
	/// Upstream-relative path with a leading slash.
	pub path: String,
	/// Outbound query pairs in their original order; duplicates are kept.
	pub query: Vec<(String, String)>,
	/// JSON body assembled from `body-` parameters, when any were present.
	pub body: Option<Map<String, Value>>,
}
impl RequestSpec {
	/// Path plus `?` and the form-urlencoded query when the query is non-empty.
	pub fn endpoint(&self) -> String {
		if self.query.is_empty() {
			return self.path.clone();
		}

		let mut query = Serializer::new(String::new());

		query.extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));

		format!("{}?{}", self.path, query.finish())
	}

	/// Surface named by the first upstream path segment, if any.
	pub fn surface(&self) -> Option<Surface> {
		self.path.trim_start_matches('/').split('/').next().and_then(Surface::from_segment)
	}

	/// Returns `true` when the forwarder should send the body.
	pub fn sends_body(&self) -> bool {
		self.method != "GET" && self.body.is_some()
	}

	/// Rebuilds a proxy URL that translates back into this request.
	///
	/// The method segment is always emitted and body fields are re-prefixed with
	/// [`BODY_PREFIX`] after the outbound query pairs.
	pub fn to_proxy_url(&self) -> String {
		let mut url = format!("/{}{}", self.method, self.path);
		let mut query = Serializer::new(String::new());

		query.extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));

		if let Some(body) = &self.body {
			for (key, value) in body {
				let value = match value {
					Value::String(value) => value.clone(),
					other => other.to_string(),
				};

				query.append_pair(&format!("{BODY_PREFIX}{key}"), &value);
			}
		}

		let query = query.finish();

		if !query.is_empty() {
			url.push('?');
			url.push_str(&query);
		}

		url
	}
}
impl FromStr for RequestSpec {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (path, query) = match s.split_once('?') {
			Some((path, query)) => (path, Some(query)),
			None => (s, None),
		};

		Ok(translate(path, query))
	}
}

/// Translates an inbound proxy path and optional raw query into a [`RequestSpec`].
pub fn translate(path: &str, query: Option<&str>) -> RequestSpec {
	let mut segments = path.split('/').collect::<Vec<_>>();

	if segments.first().is_some_and(|segment| segment.is_empty()) {
		segments.remove(0);
	}

	let method = match segments.first() {
		None => "GET".to_owned(),
		Some(first) if Surface::from_segment(first).is_some() => "GET".to_owned(),
		Some(first) if first.is_empty() => {
			segments.remove(0);

			"GET".to_owned()
		},
		Some(first) => {
			let method = first.to_uppercase();

			segments.remove(0);

			method
		},
	};
	let path = format!("/{}", segments.join("/"));
	let mut outbound = Vec::new();
	let mut body = Map::new();

	for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
		match key.strip_prefix(BODY_PREFIX) {
			Some(field) => {
				body.insert(field.to_owned(), Value::String(value.into_owned()));
			},
			None => outbound.push((key.into_owned(), value.into_owned())),
		}
	}

	RequestSpec { method, path, query: outbound, body: (!body.is_empty()).then_some(body) }
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn spec(url: &str) -> RequestSpec {
		url.parse().expect("Translation is infallible.")
	}

	#[test]
	fn surface_paths_default_to_get() {
		let spec = spec("/helix/users?login=foo");

		assert_eq!(spec.method, "GET");
		assert_eq!(spec.path, "/helix/users");
		assert_eq!(spec.endpoint(), "/helix/users?login=foo");
		assert_eq!(spec.surface(), Some(Surface::Helix));
		assert!(spec.body.is_none());
	}

	#[test]
	fn explicit_method_is_upper_cased_and_consumed() {
		let spec = spec("/post/helix/clips?body-broadcaster_id=123");

		assert_eq!(spec.method, "POST");
		assert_eq!(spec.path, "/helix/clips");
		assert_eq!(spec.endpoint(), "/helix/clips");
		assert_eq!(spec.body.map(Value::Object), Some(json!({ "broadcaster_id": "123" })));
	}

	#[test]
	fn surface_tokens_are_case_sensitive() {
		let spec = spec("/Helix/users");

		assert_eq!(spec.method, "HELIX");
		assert_eq!(spec.path, "/users");
		assert_eq!(spec.surface(), None);
	}

	#[test]
	fn empty_paths_yield_root_get() {
		for url in ["", "/"] {
			let spec = spec(url);

			assert_eq!(spec.method, "GET");
			assert_eq!(spec.path, "/");
			assert!(spec.query.is_empty());
		}
	}

	#[test]
	fn plain_queries_pass_through_in_order() {
		let spec = spec("/kraken/streams?b=2&a=1&b=3");

		assert_eq!(
			spec.query,
			vec![("b".into(), "2".into()), ("a".into(), "1".into()), ("b".into(), "3".into())]
		);
		assert_eq!(spec.endpoint(), "/kraken/streams?b=2&a=1&b=3");
		assert!(spec.body.is_none());
	}

	#[test]
	fn body_keys_are_diverted_with_last_write_wins() {
		let spec = spec("/PUT/helix/x?body-b=1&keep=yes&body-a=2&body-b=3&body-=empty");
		let body = spec.body.clone().expect("Body parameters should produce a body.");

		assert_eq!(spec.query, vec![("keep".into(), "yes".into())]);
		assert_eq!(body.keys().collect::<Vec<_>>(), vec!["b", "a", ""]);
		assert_eq!(Value::Object(body), json!({ "b": "3", "a": "2", "": "empty" }));
	}

	#[test]
	fn get_never_sends_a_body() {
		assert!(!spec("/helix/x?body-a=1").sends_body());
		assert!(spec("/DELETE/helix/x?body-a=1").sends_body());
		assert!(!spec("/DELETE/helix/x").sends_body());
	}

	#[test]
	fn endpoint_reencodes_decoded_values() {
		let spec = spec("/helix/search?query=a%20b&x=%26");

		assert_eq!(spec.query, vec![("query".into(), "a b".into()), ("x".into(), "&".into())]);
		assert_eq!(spec.endpoint(), "/helix/search?query=a+b&x=%26");
	}

	#[test]
	fn proxy_url_round_trips() {
		for url in [
			"/helix/users?login=foo",
			"/POST/helix/clips?body-broadcaster_id=123",
			"/patch/kraken/channels/1?api_version=5&body-status=live%20now&body-game=x",
			"/",
			"",
			"/helix/",
			"/get/helix/videos?id=1&id=2",
		] {
			let first = spec(url);
			let proxy_url = first.to_proxy_url();

			assert_eq!(first, spec(&proxy_url), "Round trip through `{proxy_url}` changed the request.");
		}
	}
}
