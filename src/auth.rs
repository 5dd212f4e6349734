//! Auth-domain scope sets and token models.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::{record::*, secret::*};
