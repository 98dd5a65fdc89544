//! Card reader abstraction layer for cardflow.
//!
//! This crate provides the peripheral side of a card-present transaction: a
//! trait-based card reader interface, an enum wrapper for concrete dispatch,
//! a peripheral task that owns the reader, and a mock reader for development
//! and testing without hardware.
//!
//! # Design Philosophy
//!
//! - **Async-first**: All I/O operations are asynchronous using native `async fn`
//!   in traits (Rust 1.90 + Edition 2024 RPITIT).
//! - **Single owner**: The reader lives in one task; the engine talks to it over
//!   typed channels through a [`ReaderLink`].
//! - **Thread-safe**: Readers require `Send + Sync` for use with Tokio.
//! - **Error-aware**: All operations return [`Result<T>`] with a [`PeripheralError`]
//!   that converts into a handler-facing `ErrorDescriptor`.
//!
//! # Card Readers
//!
//! ```no_run
//! use cardflow_core::TransactionMode;
//! use cardflow_hardware::error::Result;
//! use cardflow_hardware::traits::CardReaderDevice;
//! use cardflow_hardware::types::{CardReadStep, ReadRequest};
//!
//! async fn swipe_once<R: CardReaderDevice>(reader: &mut R) -> Result<bool> {
//!     let method = reader.wait_for_card().await?;
//!     let step = reader
//!         .read_card(&ReadRequest::new(method, TransactionMode::ReadOnly))
//!         .await?;
//!     Ok(matches!(step, CardReadStep::Completed(_)))
//! }
//! ```

pub mod devices;
pub mod error;
pub mod manager;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::AnyCardReader;
pub use error::{PeripheralError, Result};
pub use traits::CardReaderDevice;
pub use types::{CardData, CardReadStep, ReadRequest, ReaderCheck, ReaderInfo};

// Re-export manager types
pub use manager::{
    CommandKind, PeripheralEvent, ReaderCommand, ReaderLink, ReaderManager, ReaderManagerConfig,
};
