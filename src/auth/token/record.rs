//! Access token snapshot held by the credential store.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Fraction of the provider-reported lifetime after which the token is renewed.
pub const REFRESH_MARGIN: f64 = 0.8;

/// Current lifecycle status for an [`AccessToken`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// No refresh has succeeded yet; the value is empty.
	Unissued,
	/// Token is within its reported lifetime.
	Active,
	/// Token exceeded its reported lifetime and has not been replaced.
	Expired,
}

/// Access token snapshot: the value plus the expiry metadata reported with it.
///
/// The default value is the empty token a process starts with. Snapshots are plain data;
/// mutating one never affects the credential store it was read from.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	/// Opaque access token value; empty until the first successful refresh.
	pub value: TokenSecret,
	/// Instant the token was received, if one has been issued.
	pub issued_at: Option<OffsetDateTime>,
	/// Lifetime reported by the identity provider.
	pub expires_in: Duration,
}
impl AccessToken {
	/// Creates a snapshot for a freshly issued token.
	pub fn issued(
		value: impl Into<String>,
		issued_at: OffsetDateTime,
		expires_in: Duration,
	) -> Self {
		Self { value: TokenSecret::new(value), issued_at: Some(issued_at), expires_in }
	}

	/// Expiry instant, if the token has been issued and the instant is representable.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.issued_at.and_then(|issued_at| issued_at.checked_add(self.expires_in))
	}

	/// Delay after which the token should be renewed: `round(expires_in * 0.8)` seconds.
	pub fn refresh_in(&self) -> Duration {
		refresh_delay(self.expires_in)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if self.issued_at.is_none() {
			return TokenStatus::Unissued;
		}

		match self.expires_at() {
			Some(expires_at) if instant >= expires_at => TokenStatus::Expired,
			_ => TokenStatus::Active,
		}
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> TokenStatus {
		self.status_at(OffsetDateTime::now_utc())
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("value", &self.value)
			.field("issued_at", &self.issued_at)
			.field("expires_in", &self.expires_in)
			.finish()
	}
}

/// Applies [`REFRESH_MARGIN`] to a token lifetime, rounding to whole seconds.
pub fn refresh_delay(expires_in: Duration) -> Duration {
	let seconds = (expires_in.whole_seconds().max(0) as f64 * REFRESH_MARGIN).round();

	Duration::seconds(seconds as i64)
}
