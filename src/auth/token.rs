//! Access token snapshot and the redacting secret wrapper it is built from.

pub mod record;
pub mod secret;
