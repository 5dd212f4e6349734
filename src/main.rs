//! Twitch API proxy binary.

// std
use std::{process::ExitCode, sync::Arc};
// crates.io
use clap::Parser;
// self
use twitch_api_proxy::{
	config::{Cli, Config},
	credential::CredentialManager,
	error::Result,
	obs, server,
};

#[tokio::main]
async fn main() -> ExitCode {
	obs::init_tracing();

	match run(Cli::parse()).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			tracing::error!(error = %err, "Proxy stopped.");

			ExitCode::FAILURE
		},
	}
}

async fn run(cli: Cli) -> Result<()> {
	let config = Arc::new(Config::load(&cli)?);

	if config.client_id.is_empty() || config.client_secret.is_empty() {
		tracing::warn!("Client id or client secret is empty; token grants will be rejected.");
	}

	let manager = Arc::new(CredentialManager::new(config)?);
	// The task handle is owned by the manager; dropping this copy keeps it running.
	let _refresh = manager.start();

	server::serve(manager).await
}
