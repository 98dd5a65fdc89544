use crate::{
    Result,
    constants::{
        MASKED_PAN_VISIBLE_DIGITS, MAX_AMOUNT_SCALE, MAX_EMAIL_LENGTH, MAX_TRANSACTION_AMOUNT_MINOR,
    },
    error::Error,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Card reader status reported to the Reader Handler.
///
/// Statuses are ordered by emission, not by value. The auxiliary statuses
/// (`SelectingCardReader`, `ConfiguringReader`, `SelectingApplication`) are
/// only reached through a decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardReaderStatus {
    /// No reader connected.
    NotConnected,

    /// Waiting for the caller to pick one of several discovered readers.
    SelectingCardReader,

    /// Connecting to a reader the caller picked.
    Connecting,

    /// Reader connected.
    Connected,

    /// Verifying reader firmware and configuration.
    CheckingReader,

    /// Resetting the reader after the caller confirmed a reset.
    ConfiguringReader,

    /// Armed and waiting for a card.
    WaitingForCard,

    /// A chip card was read (contact or contactless).
    CardDipped,

    /// A magnetic stripe was swiped.
    SwipeDetected,

    /// Waiting for the caller to pick one of the card's EMV applications.
    SelectingApplication,

    /// Tokenizing the card with the backend.
    Tokenizing,

    /// Authorizing the payment with the backend.
    Authorizing,

    /// Reader released after the transaction.
    Stopped,
}

impl CardReaderStatus {
    /// Whether this status is only reachable through a decision point.
    pub fn is_auxiliary(&self) -> bool {
        matches!(
            self,
            Self::SelectingCardReader | Self::ConfiguringReader | Self::SelectingApplication
        )
    }

    /// Whether the reader is known to be connected in this status.
    pub fn is_connected(&self) -> bool {
        !matches!(
            self,
            Self::NotConnected | Self::SelectingCardReader | Self::Connecting | Self::Stopped
        )
    }

    /// Check if a transition to `target` is valid from this status.
    ///
    /// A connected reader can always go back to `Connected` (a new
    /// transaction on an idle reader) and any live status can drop to
    /// `NotConnected` when the reader is lost.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardflow_core::CardReaderStatus;
    ///
    /// assert!(CardReaderStatus::Connected.can_transition_to(&CardReaderStatus::CheckingReader));
    /// assert!(!CardReaderStatus::Connected.can_transition_to(&CardReaderStatus::CardDipped));
    /// ```
    pub fn can_transition_to(&self, target: &CardReaderStatus) -> bool {
        use CardReaderStatus::*;

        if *target == Connected && self.is_connected() {
            return true;
        }

        if *target == NotConnected {
            return !matches!(self, NotConnected | Stopped);
        }

        matches!(
            (self, target),
            // Connection
            (NotConnected | Stopped, SelectingCardReader | Connecting | Connected)
            | (SelectingCardReader, Connecting | Stopped)
            | (Connecting, Connected | Stopped)
            | (Connected, CheckingReader | Stopped)
            // Reader preparation
            | (CheckingReader, ConfiguringReader | WaitingForCard | Stopped)
            | (ConfiguringReader, WaitingForCard | Stopped)
            // Card presentment
            | (WaitingForCard, CardDipped | SwipeDetected | WaitingForCard | Stopped)
            | (CardDipped, SelectingApplication | Tokenizing | Authorizing | WaitingForCard | Stopped)
            | (SwipeDetected, Tokenizing | WaitingForCard | Stopped)
            | (SelectingApplication, Tokenizing | Authorizing | WaitingForCard | Stopped)
            // Backend
            | (Tokenizing | Authorizing, WaitingForCard | Stopped)
        )
    }
}

impl fmt::Display for CardReaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status_str = match self {
            CardReaderStatus::NotConnected => "NOT_CONNECTED",
            CardReaderStatus::SelectingCardReader => "SELECTING_CARD_READER",
            CardReaderStatus::Connecting => "CONNECTING",
            CardReaderStatus::Connected => "CONNECTED",
            CardReaderStatus::CheckingReader => "CHECKING_READER",
            CardReaderStatus::ConfiguringReader => "CONFIGURING_READER",
            CardReaderStatus::WaitingForCard => "WAITING_FOR_CARD",
            CardReaderStatus::CardDipped => "CARD_DIPPED",
            CardReaderStatus::SwipeDetected => "SWIPE_DETECTED",
            CardReaderStatus::SelectingApplication => "SELECTING_APPLICATION",
            CardReaderStatus::Tokenizing => "TOKENIZING",
            CardReaderStatus::Authorizing => "AUTHORIZING",
            CardReaderStatus::Stopped => "STOPPED",
        };
        write!(f, "{}", status_str)
    }
}

/// How the card was presented to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Chip inserted into the reader.
    Dip,

    /// Magnetic stripe swiped.
    Swipe,

    /// Contactless chip tapped.
    Tap,
}

impl PaymentMethod {
    /// Whether the card was read through its chip.
    ///
    /// Only chip reads go through the EMV kernel and can be authorized.
    pub fn is_chip(&self) -> bool {
        matches!(self, Self::Dip | Self::Tap)
    }

    /// Status emitted when a card is presented with this method.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardflow_core::{CardReaderStatus, PaymentMethod};
    ///
    /// assert_eq!(PaymentMethod::Dip.presented_status(), CardReaderStatus::CardDipped);
    /// assert_eq!(PaymentMethod::Swipe.presented_status(), CardReaderStatus::SwipeDetected);
    /// ```
    pub fn presented_status(&self) -> CardReaderStatus {
        match self {
            Self::Dip | Self::Tap => CardReaderStatus::CardDipped,
            Self::Swipe => CardReaderStatus::SwipeDetected,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Dip => write!(f, "Dip"),
            PaymentMethod::Swipe => write!(f, "Swipe"),
            PaymentMethod::Tap => write!(f, "Tap"),
        }
    }
}

/// What the transaction does with a successful read.
///
/// Fixed for the lifetime of one transaction; chosen by the entry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Report the read result only.
    ReadOnly,

    /// Exchange the read result for a payment token.
    TokenizeOnly,

    /// Tokenize, then authorize chip reads.
    TokenizeAndAuthorize,
}

impl TransactionMode {
    /// Whether the mode performs a backend round-trip.
    pub fn uses_backend(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Whether a read made with `method` must be authorized in this mode.
    pub fn authorizes(&self, method: PaymentMethod) -> bool {
        matches!(self, Self::TokenizeAndAuthorize) && method.is_chip()
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "ReadOnly"),
            TransactionMode::TokenizeOnly => write!(f, "TokenizeOnly"),
            TransactionMode::TokenizeAndAuthorize => write!(f, "TokenizeAndAuthorize"),
        }
    }
}

/// Supported transaction currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyCode {
    Usd,
    Cad,
    Gbp,
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyCode::Usd => write!(f, "USD"),
            CurrencyCode::Cad => write!(f, "CAD"),
            CurrencyCode::Gbp => write!(f, "GBP"),
        }
    }
}

/// Amount, currency and reference supplied by the caller for a tokenizing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Amount to charge.
    pub amount: Decimal,

    /// Currency of `amount`.
    pub currency: CurrencyCode,

    /// Caller-side reference (account or order id).
    pub reference_id: u64,
}

impl TransactionInfo {
    /// Create validated transaction info.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransactionInfo` if the amount is not positive,
    /// has more than two decimal places, or exceeds the maximum amount.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardflow_core::{CurrencyCode, TransactionInfo};
    /// use rust_decimal::Decimal;
    ///
    /// let info = TransactionInfo::new(Decimal::new(2461, 2), CurrencyCode::Usd, 1170640190).unwrap();
    /// assert_eq!(info.amount.to_string(), "24.61");
    ///
    /// assert!(TransactionInfo::new(Decimal::ZERO, CurrencyCode::Usd, 1).is_err());
    /// ```
    pub fn new(amount: Decimal, currency: CurrencyCode, reference_id: u64) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidTransactionInfo(format!(
                "amount must be positive, got {amount}"
            )));
        }

        if amount.normalize().scale() > MAX_AMOUNT_SCALE {
            return Err(Error::InvalidTransactionInfo(format!(
                "amount must have at most {MAX_AMOUNT_SCALE} decimal places, got {amount}"
            )));
        }

        let max = Decimal::new(MAX_TRANSACTION_AMOUNT_MINOR, MAX_AMOUNT_SCALE);
        if amount > max {
            return Err(Error::InvalidTransactionInfo(format!(
                "amount must not exceed {max}, got {amount}"
            )));
        }

        Ok(Self {
            amount,
            currency,
            reference_id,
        })
    }
}

/// Validate a payer e-mail address.
///
/// The check is deliberately shallow: one `@`, a non-empty local part, a
/// dotted domain, no whitespace.
///
/// # Errors
///
/// Returns `Error::InvalidEmail` when the address fails the check.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return Err(Error::InvalidEmail(format!(
            "length must be 1-{MAX_EMAIL_LENGTH}, got {}",
            email.len()
        )));
    }

    if email.chars().any(char::is_whitespace) {
        return Err(Error::InvalidEmail("must not contain whitespace".to_string()));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(Error::InvalidEmail("missing '@'".to_string()));
    };

    if local.is_empty() || domain.contains('@') {
        return Err(Error::InvalidEmail(format!("malformed address: {email}")));
    }

    if !domain.contains('.') || domain.split('.').any(str::is_empty) {
        return Err(Error::InvalidEmail(format!("malformed domain: {domain}")));
    }

    Ok(())
}

/// Mask a card number, keeping the last four digits.
///
/// # Examples
///
/// ```
/// use cardflow_core::mask_pan;
///
/// assert_eq!(mask_pan("4111111111111111"), "************1111");
/// assert_eq!(mask_pan("123"), "123");
/// ```
pub fn mask_pan(pan: &str) -> String {
    let digits: Vec<char> = pan.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() <= MASKED_PAN_VISIBLE_DIGITS {
        return digits.into_iter().collect();
    }

    let hidden = digits.len() - MASKED_PAN_VISIBLE_DIGITS;
    std::iter::repeat_n('*', hidden)
        .chain(digits[hidden..].iter().copied())
        .collect()
}

/// Result of a successful card read.
///
/// Handlers receive clones; mutating one has no effect on the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// How the card was presented.
    pub payment_method: PaymentMethod,

    /// Card number with all but the last four digits masked.
    pub masked_pan: String,

    /// Cardholder name, when the card carries one.
    pub cardholder_name: Option<String>,

    /// Expiry as `MM/YY`, when available.
    pub expiry: Option<String>,

    /// Label of the EMV application used, for chip reads.
    pub application_label: Option<String>,

    /// Amount confirmed for the transaction, if any.
    pub amount: Option<Decimal>,

    /// Currency of `amount`.
    pub currency: Option<CurrencyCode>,

    /// Caller reference attached to the transaction.
    pub reference_id: Option<u64>,

    /// Payer e-mail collected for the receipt.
    pub email: Option<String>,

    /// When the read completed.
    pub read_at: DateTime<Utc>,
}

impl PaymentInfo {
    /// Create payment info from a method and an unmasked or masked card number.
    pub fn new(payment_method: PaymentMethod, pan: &str) -> Self {
        Self {
            payment_method,
            masked_pan: mask_pan(pan),
            cardholder_name: None,
            expiry: None,
            application_label: None,
            amount: None,
            currency: None,
            reference_id: None,
            email: None,
            read_at: Utc::now(),
        }
    }

    /// Set the cardholder name.
    pub fn with_cardholder_name(mut self, name: impl Into<String>) -> Self {
        self.cardholder_name = Some(name.into());
        self
    }

    /// Set the expiry (`MM/YY`).
    pub fn with_expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    /// Set the EMV application label.
    pub fn with_application_label(mut self, label: impl Into<String>) -> Self {
        self.application_label = Some(label.into());
        self
    }

    /// Attach the caller's transaction info.
    pub fn with_transaction_info(mut self, info: &TransactionInfo) -> Self {
        self.amount = Some(info.amount);
        self.currency = Some(info.currency);
        self.reference_id = Some(info.reference_id);
        self
    }

    /// Attach the payer e-mail.
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Last four digits of the card number.
    pub fn last_four(&self) -> &str {
        let start = self.masked_pan.len().saturating_sub(MASKED_PAN_VISIBLE_DIGITS);
        &self.masked_pan[start..]
    }
}

/// Opaque token the backend issued for a card.
///
/// # Security
///
/// Equality is constant-time so token comparisons do not leak timing.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct PaymentToken {
    /// Backend token identifier.
    pub id: String,
}

impl PaymentToken {
    /// Wrap a backend token identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl PartialEq for PaymentToken {
    fn eq(&self, other: &Self) -> bool {
        self.id.as_bytes().ct_eq(other.id.as_bytes()).into()
    }
}

impl fmt::Display for PaymentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Backend approval of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationInfo {
    /// Backend transaction identifier.
    pub transaction_token: String,

    /// Token the authorization was made with.
    pub token_id: String,

    /// Issuer authorization code.
    pub authorization_code: String,

    /// Authorized amount.
    pub amount: Decimal,

    /// Authorized currency.
    pub currency: CurrencyCode,

    /// When the backend approved the payment.
    pub authorized_at: DateTime<Utc>,
}
