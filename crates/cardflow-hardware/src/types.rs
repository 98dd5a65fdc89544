//! Common types shared across card reader implementations.
//!
//! This module defines the data a reader reports back to the engine:
//! reader metadata, health checks and raw card reads.

use cardflow_core::{PaymentInfo, PaymentMethod, TransactionInfo, TransactionMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Card reader information.
///
/// Contains metadata about a connected reader such as name, model,
/// serial number, and firmware version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Reader name as reported during discovery (e.g., "MOCK-READER-1").
    pub name: String,

    /// Reader model identifier.
    pub model: String,

    /// Optional reader serial number.
    pub serial_number: Option<String>,

    /// Optional firmware version string.
    pub firmware_version: Option<String>,

    /// When the connection was established.
    pub connected_at: Option<DateTime<Utc>>,
}

impl ReaderInfo {
    /// Create a new ReaderInfo with required fields.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            serial_number: None,
            firmware_version: None,
            connected_at: None,
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }

    /// Stamp the connection time.
    pub fn connected_now(mut self) -> Self {
        self.connected_at = Some(Utc::now());
        self
    }
}

/// Outcome of a reader health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReaderCheck {
    /// The reader recommends a reset before reading cards.
    pub reset_recommended: bool,

    /// Battery charge in percent, when the reader reports it.
    pub battery_level: Option<u8>,
}

/// Parameters for a card read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// How the card was presented.
    pub payment_method: PaymentMethod,

    /// Mode of the transaction the read belongs to.
    pub mode: TransactionMode,

    /// Amount and currency to show on the reader, for tokenizing modes.
    pub transaction_info: Option<TransactionInfo>,
}

impl ReadRequest {
    /// Create a read request for a presented card.
    pub fn new(payment_method: PaymentMethod, mode: TransactionMode) -> Self {
        Self {
            payment_method,
            mode,
            transaction_info: None,
        }
    }

    /// Attach the transaction info.
    pub fn with_transaction_info(mut self, info: Option<TransactionInfo>) -> Self {
        self.transaction_info = info;
        self
    }
}

/// Raw card data returned by the reader.
///
/// Holds the unmasked card number, so `Debug` only prints its last digits.
#[derive(Clone, PartialEq, Eq)]
pub struct CardData {
    /// How the card was presented.
    pub payment_method: PaymentMethod,

    /// Primary account number as read from the card.
    pub pan: String,

    /// Cardholder name from the card, if present.
    pub cardholder_name: Option<String>,

    /// Expiry as `MM/YY`.
    pub expiry: Option<String>,

    /// Label of the EMV application used.
    pub application_label: Option<String>,
}

impl CardData {
    /// Create card data from a presentment method and card number.
    pub fn new(payment_method: PaymentMethod, pan: impl Into<String>) -> Self {
        Self {
            payment_method,
            pan: pan.into(),
            cardholder_name: None,
            expiry: None,
            application_label: None,
        }
    }

    /// Set the cardholder name.
    pub fn with_cardholder_name(mut self, name: impl Into<String>) -> Self {
        self.cardholder_name = Some(name.into());
        self
    }

    /// Set the expiry.
    pub fn with_expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    /// Set the EMV application label.
    pub fn with_application_label(mut self, label: impl Into<String>) -> Self {
        self.application_label = Some(label.into());
        self
    }

    /// Convert into the masked snapshot handed to handlers.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardflow_core::PaymentMethod;
    /// use cardflow_hardware::CardData;
    ///
    /// let card = CardData::new(PaymentMethod::Swipe, "4111111111111111");
    /// let info = card.into_payment_info();
    /// assert_eq!(info.masked_pan, "************1111");
    /// ```
    pub fn into_payment_info(self) -> PaymentInfo {
        let mut info = PaymentInfo::new(self.payment_method, &self.pan);
        if let Some(name) = self.cardholder_name {
            info = info.with_cardholder_name(name);
        }
        if let Some(expiry) = self.expiry {
            info = info.with_expiry(expiry);
        }
        if let Some(label) = self.application_label {
            info = info.with_application_label(label);
        }
        info
    }
}

impl fmt::Debug for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardData")
            .field("payment_method", &self.payment_method)
            .field("pan", &cardflow_core::mask_pan(&self.pan))
            .field("cardholder_name", &self.cardholder_name)
            .field("expiry", &self.expiry)
            .field("application_label", &self.application_label)
            .finish()
    }
}

/// Next step of a card read.
///
/// Chip cards carrying several EMV applications pause the read until one
/// is chosen with [`CardReaderDevice::select_application`](crate::CardReaderDevice::select_application).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardReadStep {
    /// The card offers several applications; the caller must pick one.
    ApplicationSelection(Vec<String>),

    /// The read finished.
    Completed(CardData),
}
