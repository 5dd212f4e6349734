//! Twitch API proxy: translate compact proxy URLs into Helix/Kraken calls and keep the OAuth
//! access token fresh behind the scenes.
//!
//! The crate is split the same way the request pipeline is:
//!
//! - [`translate`] turns an inbound proxy URL into a [`translate::RequestSpec`].
//! - [`credential`] owns the access token and renews it ahead of expiry.
//! - [`forward`] attaches surface-specific headers and relays the upstream response.
//! - [`server`] exposes the proxy and the OAuth setup routes over `axum`.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod forward;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod server;
pub mod setup;
pub mod translate;

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tower as _};
