//! Card reader trait definition.
//!
//! [`CardReaderDevice`] is the narrow capability interface the transaction
//! engine drives: discover, connect, check, reset, wait for a card, read it
//! and disconnect. Transport details (Bluetooth pairing, audio jack framing)
//! and the EMV kernel live behind it.
//!
//! The trait uses native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT),
//! so it is not object-safe; see [`AnyCardReader`](crate::devices::AnyCardReader)
//! for concrete dispatch.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::types::{CardReadStep, ReadRequest, ReaderCheck, ReaderInfo};
use cardflow_core::PaymentMethod;

/// Trait for card-reading peripherals.
///
/// Implementations must be `Send + Sync` so the reader can be moved into
/// the peripheral task spawned by [`ReaderManager`](crate::manager::ReaderManager).
///
/// A read follows this sequence:
///
/// 1. [`discover`](Self::discover) the readers in range
/// 2. [`connect`](Self::connect) to one of them
/// 3. [`check_reader`](Self::check_reader), then [`reset`](Self::reset) if recommended
/// 4. [`wait_for_card`](Self::wait_for_card)
/// 5. [`read_card`](Self::read_card), then [`select_application`](Self::select_application)
///    while the card asks for one
/// 6. [`disconnect`](Self::disconnect)
///
/// # Examples
///
/// ```no_run
/// use cardflow_core::{PaymentMethod, TransactionMode};
/// use cardflow_hardware::error::Result;
/// use cardflow_hardware::traits::CardReaderDevice;
/// use cardflow_hardware::types::{CardData, CardReadStep, ReadRequest};
///
/// async fn read_first_application<R: CardReaderDevice>(reader: &mut R) -> Result<CardData> {
///     let readers = reader.discover().await?;
///     reader.connect(&readers[0]).await?;
///
///     let method = reader.wait_for_card().await?;
///     let request = ReadRequest::new(method, TransactionMode::ReadOnly);
///
///     let mut step = reader.read_card(&request).await?;
///     loop {
///         match step {
///             CardReadStep::ApplicationSelection(_) => {
///                 step = reader.select_application(0).await?;
///             }
///             CardReadStep::Completed(card) => return Ok(card),
///         }
///     }
/// }
/// ```
pub trait CardReaderDevice: Send + Sync {
    /// List the names of readers currently in range.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot scan.
    async fn discover(&mut self) -> Result<Vec<String>>;

    /// Connect to the named reader.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The reader is not in range
    /// - The connection handshake fails
    async fn connect(&mut self, name: &str) -> Result<ReaderInfo>;

    /// Check reader health and firmware configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is not connected or does not answer.
    async fn check_reader(&mut self) -> Result<ReaderCheck>;

    /// Reset and reconfigure the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset does not complete.
    async fn reset(&mut self) -> Result<()>;

    /// Wait until a card is dipped, swiped or tapped.
    ///
    /// This method blocks asynchronously until a card is presented. The
    /// caller is responsible for any timeout or cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device is disconnected
    /// - The cardholder cancels on the reader
    async fn wait_for_card(&mut self) -> Result<PaymentMethod>;

    /// Read the presented card.
    ///
    /// # Errors
    ///
    /// Returns a card read error if the card cannot be read or the EMV
    /// kernel declines it.
    async fn read_card(&mut self, request: &ReadRequest) -> Result<CardReadStep>;

    /// Continue a paused chip read with the chosen application.
    ///
    /// # Errors
    ///
    /// Returns an error if no read is paused or the index is out of range.
    async fn select_application(&mut self, index: usize) -> Result<CardReadStep>;

    /// Battery charge in percent.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is not connected.
    async fn battery_level(&mut self) -> Result<u8>;

    /// Release the reader.
    ///
    /// Disconnecting an already disconnected reader is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails while closing.
    async fn disconnect(&mut self) -> Result<()>;

    /// Metadata of the connected reader.
    ///
    /// # Errors
    ///
    /// Returns a disconnected error if no reader is connected.
    async fn get_reader_info(&self) -> Result<ReaderInfo>;

    /// Whether a reader is currently connected.
    fn is_connected(&self) -> bool;
}
