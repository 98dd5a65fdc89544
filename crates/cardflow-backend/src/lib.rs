//! Payment backend collaborators for cardflow.
//!
//! The transaction engine tokenizes card reads and authorizes payments
//! through a [`BackendClient`]. This crate defines that interface, its
//! enum dispatch wrapper and a configurable mock.

pub mod client;
pub mod error;
pub mod mock;

pub use client::{AnyBackendClient, BackendClient};
pub use error::{BackendError, BackendOperation, Result};
pub use mock::{MockBackendClient, MockBackendConfig, MockBackendHandle};
