//! Observability helpers shared by the refresh task, the setup routes, and the forwarder.
//!
//! Every flow emits a structured span named `twitch_api_proxy.flow` with the `flow` (which
//! pipeline) and `stage` (call site) fields. Enable the `metrics` feature to also increment
//! the `twitch_api_proxy_flow_total` counter for every attempt/success/failure, labeled by
//! `flow` + `outcome`.

mod metrics;
mod tracing;

pub use self::metrics::*;
pub use self::tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Refresh token grant run by the credential manager.
	Refresh,
	/// Authorization Code grant run by the setup callback.
	AuthorizationCode,
	/// Translated request relayed to the upstream API.
	Forward,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Refresh => "refresh",
			FlowKind::AuthorizationCode => "authorization_code",
			FlowKind::Forward => "forward",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
