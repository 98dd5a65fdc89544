//! Shared data model for card-present transactions.
//!
//! This crate holds the types every other cardflow crate agrees on: reader
//! statuses, payment data, error descriptors handed to handlers, the
//! boundary [`Error`] type and the session [`Config`].

pub mod config;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod types;

pub use config::{Config, Environment, PolicyConfig};
pub use descriptor::{ErrorDescriptor, ErrorKind};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
