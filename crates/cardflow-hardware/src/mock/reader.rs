//! Mock card reader implementation for testing and development.
//!
//! This module provides a simulated card reader whose behaviour is set by a
//! [`MockReaderConfig`] and which can be driven programmatically through a
//! [`MockCardReaderHandle`] without requiring physical hardware.

use crate::{
    PeripheralError, Result,
    traits::CardReaderDevice,
    types::{CardData, CardReadStep, ReadRequest, ReaderCheck, ReaderInfo},
};
use cardflow_core::PaymentMethod;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Name of the first mock reader reported by discovery.
pub const MOCK_READER_NAME: &str = "MOCK-READER-1";

/// Name of the second mock reader, reported when several readers are simulated.
pub const SECOND_MOCK_READER_NAME: &str = "MOCK-READER-2";

/// Card number the mock reader returns.
pub const MOCK_PAN: &str = "4111111111111111";

/// EMV applications offered by a mock chip card with several applications.
pub const MOCK_APPLICATIONS: [&str; 2] = ["VISA CREDIT", "VISA DEBIT"];

/// Message of the EMV error reported for a simulated read failure.
pub const MOCK_READ_FAILURE_MESSAGE: &str = "UnknownError";

/// Behaviour of a [`MockCardReader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockReaderConfig {
    /// How auto-presented cards are presented.
    pub payment_method: PaymentMethod,

    /// Every card read fails with an EMV error.
    pub card_read_failure: bool,

    /// Chip cards offer several EMV applications.
    pub multiple_emv_applications: bool,

    /// Discovery finds two readers.
    pub multiple_card_readers: bool,

    /// The reader asks for a reset until one is performed.
    pub reset_required: bool,

    /// Present a card as soon as one is awaited.
    ///
    /// When false, cards are only presented through
    /// [`MockCardReaderHandle::present_card`].
    pub auto_present: bool,

    /// Reported battery charge in percent.
    pub battery_level: u8,

    /// Simulated latency of reader operations, in milliseconds.
    pub delay_ms: u64,
}

impl Default for MockReaderConfig {
    fn default() -> Self {
        Self {
            payment_method: PaymentMethod::Swipe,
            card_read_failure: false,
            multiple_emv_applications: false,
            multiple_card_readers: false,
            reset_required: false,
            auto_present: true,
            battery_level: 90,
            delay_ms: 0,
        }
    }
}

impl MockReaderConfig {
    /// Set the presentment method of auto-presented cards.
    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    /// Make every card read fail.
    pub fn with_card_read_failure(mut self, enabled: bool) -> Self {
        self.card_read_failure = enabled;
        self
    }

    /// Offer several EMV applications on chip reads.
    pub fn with_multiple_emv_applications(mut self, enabled: bool) -> Self {
        self.multiple_emv_applications = enabled;
        self
    }

    /// Report two readers during discovery.
    pub fn with_multiple_card_readers(mut self, enabled: bool) -> Self {
        self.multiple_card_readers = enabled;
        self
    }

    /// Require a reset before reading.
    pub fn with_reset_required(mut self, enabled: bool) -> Self {
        self.reset_required = enabled;
        self
    }

    /// Enable or disable automatic card presentment.
    pub fn with_auto_present(mut self, enabled: bool) -> Self {
        self.auto_present = enabled;
        self
    }

    /// Set the reported battery level.
    pub fn with_battery_level(mut self, level: u8) -> Self {
        self.battery_level = level;
        self
    }

    /// Set the simulated operation latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Operation counters shared between a mock reader and its handle.
#[derive(Debug, Default)]
struct MockReaderStats {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    resets: AtomicUsize,
    reads: AtomicUsize,
}

/// Internal event type for the mock reader.
#[derive(Debug, Clone)]
enum MockEvent {
    CardPresented(PaymentMethod),
    Unplugged,
}

/// Mock card reader for testing and development.
///
/// # Examples
///
/// ```
/// use cardflow_core::{PaymentMethod, TransactionMode};
/// use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
/// use cardflow_hardware::traits::CardReaderDevice;
/// use cardflow_hardware::types::{CardReadStep, ReadRequest};
///
/// #[tokio::main]
/// async fn main() -> cardflow_hardware::Result<()> {
///     let config = MockReaderConfig::default().with_auto_present(false);
///     let (mut reader, handle) = MockCardReader::new(config);
///
///     let names = reader.discover().await?;
///     reader.connect(&names[0]).await?;
///
///     handle.present_card(PaymentMethod::Dip).await?;
///     let method = reader.wait_for_card().await?;
///
///     let step = reader
///         .read_card(&ReadRequest::new(method, TransactionMode::ReadOnly))
///         .await?;
///     assert!(matches!(step, CardReadStep::Completed(_)));
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockCardReader {
    /// Simulated behaviour.
    config: MockReaderConfig,

    /// Channel receiver for presentment and unplug events.
    event_rx: mpsc::Receiver<MockEvent>,

    /// Connected reader, if any.
    connected: Option<ReaderInfo>,

    /// Chip read paused on application selection.
    pending_read: Option<PaymentMethod>,

    /// Whether a reset has configured the reader.
    reset_done: bool,

    /// Shared operation counters.
    stats: Arc<MockReaderStats>,
}

impl MockCardReader {
    /// Create a new mock reader.
    ///
    /// Returns a tuple of (MockCardReader, MockCardReaderHandle) where the
    /// handle can be used to present cards, unplug the reader and inspect
    /// operation counters.
    pub fn new(config: MockReaderConfig) -> (Self, MockCardReaderHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let stats = Arc::new(MockReaderStats::default());

        let reader = Self {
            config,
            event_rx,
            connected: None,
            pending_read: None,
            reset_done: false,
            stats: Arc::clone(&stats),
        };

        let handle = MockCardReaderHandle { event_tx, stats };

        (reader, handle)
    }

    /// Simulated behaviour of this reader.
    pub fn config(&self) -> &MockReaderConfig {
        &self.config
    }

    async fn simulate_latency(&self) {
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
    }

    fn require_connected(&self) -> Result<&ReaderInfo> {
        self.connected
            .as_ref()
            .ok_or_else(|| PeripheralError::disconnected(MOCK_READER_NAME))
    }

    fn unplug(&mut self) -> PeripheralError {
        let name = self
            .connected
            .take()
            .map(|info| info.name)
            .unwrap_or_else(|| MOCK_READER_NAME.to_string());
        self.pending_read = None;
        PeripheralError::disconnected(name)
    }

    fn card_for(method: PaymentMethod, application: Option<&str>) -> CardData {
        let card = CardData::new(method, MOCK_PAN)
            .with_cardholder_name("TEST CARDHOLDER")
            .with_expiry("12/30");

        match (method.is_chip(), application) {
            (true, Some(label)) => card.with_application_label(label),
            (true, None) => card.with_application_label(MOCK_APPLICATIONS[0]),
            (false, _) => card,
        }
    }
}

impl CardReaderDevice for MockCardReader {
    async fn discover(&mut self) -> Result<Vec<String>> {
        self.simulate_latency().await;

        let mut names = vec![MOCK_READER_NAME.to_string()];
        if self.config.multiple_card_readers {
            names.push(SECOND_MOCK_READER_NAME.to_string());
        }
        Ok(names)
    }

    async fn connect(&mut self, name: &str) -> Result<ReaderInfo> {
        self.simulate_latency().await;

        let known = name == MOCK_READER_NAME
            || (self.config.multiple_card_readers && name == SECOND_MOCK_READER_NAME);
        if !known {
            return Err(PeripheralError::initialization_failed(format!(
                "Reader {} is not in range",
                name
            )));
        }

        let info = ReaderInfo::new(name, "Mock Card Reader")
            .with_serial_number(format!("SN-{}", name))
            .with_firmware_version("1.0.0")
            .connected_now();

        self.connected = Some(info.clone());
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(info)
    }

    async fn check_reader(&mut self) -> Result<ReaderCheck> {
        self.simulate_latency().await;
        self.require_connected()?;

        Ok(ReaderCheck {
            reset_recommended: self.config.reset_required && !self.reset_done,
            battery_level: Some(self.config.battery_level),
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.simulate_latency().await;
        self.require_connected()?;

        self.reset_done = true;
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_card(&mut self) -> Result<PaymentMethod> {
        self.require_connected()?;

        if self.config.auto_present {
            if let Ok(MockEvent::Unplugged) = self.event_rx.try_recv() {
                return Err(self.unplug());
            }
            self.simulate_latency().await;
            return Ok(self.config.payment_method);
        }

        match self.event_rx.recv().await {
            Some(MockEvent::CardPresented(method)) => Ok(method),
            Some(MockEvent::Unplugged) | None => Err(self.unplug()),
        }
    }

    async fn read_card(&mut self, request: &ReadRequest) -> Result<CardReadStep> {
        self.simulate_latency().await;
        self.require_connected()?;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);

        if self.config.card_read_failure {
            return Err(PeripheralError::card_read(MOCK_READ_FAILURE_MESSAGE));
        }

        let method = request.payment_method;
        if method.is_chip() && self.config.multiple_emv_applications {
            self.pending_read = Some(method);
            return Ok(CardReadStep::ApplicationSelection(
                MOCK_APPLICATIONS.iter().map(|app| app.to_string()).collect(),
            ));
        }

        Ok(CardReadStep::Completed(Self::card_for(method, None)))
    }

    async fn select_application(&mut self, index: usize) -> Result<CardReadStep> {
        self.simulate_latency().await;
        self.require_connected()?;

        let method = self
            .pending_read
            .take()
            .ok_or_else(|| PeripheralError::invalid_data("No application selection pending"))?;

        let application = MOCK_APPLICATIONS.get(index).ok_or_else(|| {
            PeripheralError::invalid_data(format!("Application index {} out of range", index))
        })?;

        Ok(CardReadStep::Completed(Self::card_for(
            method,
            Some(*application),
        )))
    }

    async fn battery_level(&mut self) -> Result<u8> {
        self.require_connected()?;
        Ok(self.config.battery_level)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected.take().is_some() {
            self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        self.pending_read = None;
        Ok(())
    }

    async fn get_reader_info(&self) -> Result<ReaderInfo> {
        self.require_connected().cloned()
    }

    fn is_connected(&self) -> bool {
        self.connected.is_some()
    }
}

/// Handle for controlling a mock card reader.
///
/// # Examples
///
/// ```
/// use cardflow_core::PaymentMethod;
/// use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
///
/// #[tokio::main]
/// async fn main() -> cardflow_hardware::Result<()> {
///     let (_reader, handle) = MockCardReader::new(MockReaderConfig::default());
///
///     handle.present_card(PaymentMethod::Swipe).await?;
///     assert_eq!(handle.read_count(), 0);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockCardReaderHandle {
    /// Channel sender for presentment and unplug events.
    event_tx: mpsc::Sender<MockEvent>,

    /// Shared operation counters.
    stats: Arc<MockReaderStats>,
}

impl MockCardReaderHandle {
    /// Present a card to the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn present_card(&self, method: PaymentMethod) -> Result<()> {
        self.event_tx
            .send(MockEvent::CardPresented(method))
            .await
            .map_err(|_| PeripheralError::disconnected("Mock reader dropped"))
    }

    /// Simulate the reader losing its connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn unplug(&self) -> Result<()> {
        self.event_tx
            .send(MockEvent::Unplugged)
            .await
            .map_err(|_| PeripheralError::disconnected("Mock reader dropped"))
    }

    /// Number of successful connections.
    pub fn connect_count(&self) -> usize {
        self.stats.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnections of a connected reader.
    pub fn disconnect_count(&self) -> usize {
        self.stats.disconnects.load(Ordering::SeqCst)
    }

    /// Number of resets performed.
    pub fn reset_count(&self) -> usize {
        self.stats.resets.load(Ordering::SeqCst)
    }

    /// Number of card reads attempted.
    pub fn read_count(&self) -> usize {
        self.stats.reads.load(Ordering::SeqCst)
    }
}
