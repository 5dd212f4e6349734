// crates.io
use tracing::{Instrument, instrument::Instrumented};
use tracing_subscriber::EnvFilter;
// self
use crate::{_prelude::*, obs::FlowKind};

/// A span builder used by proxy flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("twitch_api_proxy.flow", flow = kind.as_str(), stage) }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}

/// Installs the global `fmt` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Calling this more than once is harmless;
/// later calls leave the first subscriber in place.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.try_init();
}

#[cfg(test)]
mod tests {
	// self
	use super::FlowSpan;
	use crate::obs::FlowKind;

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FlowSpan::new(FlowKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
