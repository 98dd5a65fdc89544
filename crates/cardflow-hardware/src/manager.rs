//! Card reader peripheral task.
//!
//! This module provides the [`ReaderManager`], which moves a card reader into
//! its own async task, and the [`ReaderLink`] the transaction engine uses to
//! talk to it. Commands go in on one channel; typed [`PeripheralEvent`]s come
//! back on another, one event per command, in command order.
//!
//! # Architecture
//!
//! ```text
//!                  ReaderCommand (mpsc)
//! ┌────────────┐ ──────────────────────► ┌──────────────────┐
//! │ ReaderLink │                         │  Peripheral task │──► AnyCardReader
//! │ (engine)   │ ◄────────────────────── │  (owns device)   │
//! └────────────┘   PeripheralEvent (mpsc)└──────────────────┘
//! ```
//!
//! Per-command timeouts are applied inside the task, so a late device answer
//! never shows up as a stale event for a later command. Waiting for a card is
//! the one command that can be interrupted: a [`ReaderCommand::CancelWait`]
//! sent while it is pending ends the wait with [`PeripheralEvent::WaitCancelled`].
//! Any other command sent during a wait also ends it that way and then runs.
//!
//! # Examples
//!
//! ```no_run
//! use cardflow_hardware::devices::AnyCardReader;
//! use cardflow_hardware::manager::{ReaderManager, ReaderManagerConfig};
//! use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> cardflow_hardware::Result<()> {
//!     let (reader, _handle) = MockCardReader::new(MockReaderConfig::default());
//!     let manager = ReaderManager::new(AnyCardReader::Mock(reader), ReaderManagerConfig::default());
//!
//!     let mut link = manager.start()?;
//!     let names = link.discover().await?;
//!     let info = link.connect(&names[0]).await?;
//!     println!("Connected to {}", info.name);
//!
//!     link.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::devices::AnyCardReader;
use crate::traits::CardReaderDevice;
use crate::types::{CardData, CardReadStep, ReadRequest, ReaderCheck, ReaderInfo};
use crate::{PeripheralError, Result};
use cardflow_core::PaymentMethod;
use cardflow_core::constants::DEFAULT_READER_COMMAND_TIMEOUT_MS;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Capacity of the command and event channels.
const CHANNEL_CAPACITY: usize = 16;

/// Command sent to the peripheral task.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ReaderCommand {
    /// List readers in range.
    Discover,

    /// Connect to the named reader.
    Connect {
        /// Reader name from discovery.
        name: String,
    },

    /// Run the reader health check.
    CheckReader,

    /// Reset and reconfigure the reader.
    Reset,

    /// Wait for a card, optionally bounded.
    WaitForCard {
        /// Maximum wait; `None` waits until a card or a cancel arrives.
        timeout: Option<Duration>,
    },

    /// Interrupt a pending card wait.
    CancelWait,

    /// Read the presented card.
    ReadCard(ReadRequest),

    /// Continue a chip read with the chosen application.
    SelectApplication {
        /// Index into the offered applications.
        index: usize,
    },

    /// Query the battery charge.
    BatteryLevel,

    /// Release the reader.
    Disconnect,
}

impl ReaderCommand {
    /// Kind of this command, for event correlation and logging.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Discover => CommandKind::Discover,
            Self::Connect { .. } => CommandKind::Connect,
            Self::CheckReader => CommandKind::CheckReader,
            Self::Reset => CommandKind::Reset,
            Self::WaitForCard { .. } => CommandKind::WaitForCard,
            Self::CancelWait => CommandKind::CancelWait,
            Self::ReadCard(_) => CommandKind::ReadCard,
            Self::SelectApplication { .. } => CommandKind::SelectApplication,
            Self::BatteryLevel => CommandKind::BatteryLevel,
            Self::Disconnect => CommandKind::Disconnect,
        }
    }
}

/// Kind of a reader command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Discovery.
    Discover,

    /// Connection.
    Connect,

    /// Health check.
    CheckReader,

    /// Reset.
    Reset,

    /// Card wait.
    WaitForCard,

    /// Card wait interruption.
    CancelWait,

    /// Card read.
    ReadCard,

    /// Application selection.
    SelectApplication,

    /// Battery query.
    BatteryLevel,

    /// Disconnection.
    Disconnect,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Connect => "connect",
            Self::CheckReader => "check_reader",
            Self::Reset => "reset",
            Self::WaitForCard => "wait_for_card",
            Self::CancelWait => "cancel_wait",
            Self::ReadCard => "read_card",
            Self::SelectApplication => "select_application",
            Self::BatteryLevel => "battery_level",
            Self::Disconnect => "disconnect",
        };
        write!(f, "{}", name)
    }
}

/// Event reported by the peripheral task.
///
/// Exactly one event answers each command.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PeripheralEvent {
    /// Readers found by discovery.
    ReadersDiscovered(Vec<String>),

    /// Connection established.
    Connected(ReaderInfo),

    /// Health check finished.
    ReaderChecked(ReaderCheck),

    /// Reset finished.
    ResetComplete,

    /// A card was presented.
    CardPresented(PaymentMethod),

    /// A card wait was interrupted, or no wait was pending.
    WaitCancelled,

    /// The card offers several applications.
    ApplicationSelectionRequired(Vec<String>),

    /// The card was read.
    CardRead(CardData),

    /// Battery charge in percent.
    BatteryLevel(u8),

    /// The reader was released.
    Disconnected,

    /// A command failed.
    ///
    /// Failures do not stop the task; the next command is processed normally.
    Failed {
        /// Command that failed.
        command: CommandKind,

        /// Failure reported by the reader or the timeout.
        error: PeripheralError,
    },
}

/// Configuration for the peripheral task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderManagerConfig {
    /// Timeout applied to every command except card waits.
    pub command_timeout: Duration,
}

impl Default for ReaderManagerConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(DEFAULT_READER_COMMAND_TIMEOUT_MS),
        }
    }
}

/// Engine-side handle to the peripheral task.
///
/// The link tracks which reader is connected from the events it receives.
/// Dropping the link closes the command channel; the task then releases the
/// reader and exits.
pub struct ReaderLink {
    /// Command sender.
    command_tx: mpsc::Sender<ReaderCommand>,

    /// Event receiver.
    event_rx: mpsc::Receiver<PeripheralEvent>,

    /// Running peripheral task.
    task: Option<JoinHandle<Result<()>>>,

    /// Currently connected reader.
    connected: Option<ReaderInfo>,
}

impl ReaderLink {
    /// Send a command without waiting for its event.
    ///
    /// # Errors
    ///
    /// Returns a disconnected error if the peripheral task has exited.
    pub async fn send(&self, command: ReaderCommand) -> Result<()> {
        trace!(command = %command.kind(), "Sending reader command");
        self.command_tx
            .send(command)
            .await
            .map_err(|_| PeripheralError::disconnected("peripheral task exited"))
    }

    /// Receive the next event.
    ///
    /// # Errors
    ///
    /// Returns a disconnected error if the peripheral task has exited.
    pub async fn recv(&mut self) -> Result<PeripheralEvent> {
        let event = self
            .event_rx
            .recv()
            .await
            .ok_or_else(|| PeripheralError::disconnected("peripheral task exited"))?;

        match &event {
            PeripheralEvent::Connected(info) => self.connected = Some(info.clone()),
            PeripheralEvent::Disconnected => self.connected = None,
            PeripheralEvent::Failed { error, .. } if error.is_disconnect() => {
                self.connected = None
            }
            _ => {}
        }

        Ok(event)
    }

    /// Send a command and wait for its event.
    ///
    /// A [`PeripheralEvent::Failed`] answer is returned as the error.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error of a failed command, or a disconnected
    /// error if the task has exited.
    pub async fn request(&mut self, command: ReaderCommand) -> Result<PeripheralEvent> {
        self.send(command).await?;
        match self.recv().await? {
            PeripheralEvent::Failed { error, .. } => Err(error),
            event => Ok(event),
        }
    }

    /// Discover readers in range.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if discovery fails.
    pub async fn discover(&mut self) -> Result<Vec<String>> {
        match self.request(ReaderCommand::Discover).await? {
            PeripheralEvent::ReadersDiscovered(names) => Ok(names),
            other => Err(unexpected(CommandKind::Discover, &other)),
        }
    }

    /// Connect to the named reader.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the connection fails.
    pub async fn connect(&mut self, name: &str) -> Result<ReaderInfo> {
        let command = ReaderCommand::Connect {
            name: name.to_string(),
        };
        match self.request(command).await? {
            PeripheralEvent::Connected(info) => Ok(info),
            other => Err(unexpected(CommandKind::Connect, &other)),
        }
    }

    /// Run the reader health check.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the check fails.
    pub async fn check_reader(&mut self) -> Result<ReaderCheck> {
        match self.request(ReaderCommand::CheckReader).await? {
            PeripheralEvent::ReaderChecked(check) => Ok(check),
            other => Err(unexpected(CommandKind::CheckReader, &other)),
        }
    }

    /// Reset the reader.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the reset fails.
    pub async fn reset(&mut self) -> Result<()> {
        match self.request(ReaderCommand::Reset).await? {
            PeripheralEvent::ResetComplete => Ok(()),
            other => Err(unexpected(CommandKind::Reset, &other)),
        }
    }

    /// Start waiting for a card.
    ///
    /// The answer arrives through [`recv`](Self::recv) as
    /// [`PeripheralEvent::CardPresented`], [`PeripheralEvent::WaitCancelled`]
    /// or [`PeripheralEvent::Failed`].
    ///
    /// # Errors
    ///
    /// Returns a disconnected error if the peripheral task has exited.
    pub async fn begin_wait_for_card(&self, timeout: Option<Duration>) -> Result<()> {
        self.send(ReaderCommand::WaitForCard { timeout }).await
    }

    /// Interrupt a pending card wait.
    ///
    /// Events produced before the interruption took effect are discarded.
    ///
    /// # Errors
    ///
    /// Returns a disconnected error if the peripheral task has exited.
    pub async fn cancel_wait(&mut self) -> Result<()> {
        self.send(ReaderCommand::CancelWait).await?;
        loop {
            match self.recv().await? {
                PeripheralEvent::WaitCancelled => return Ok(()),
                event => debug!(?event, "Discarding event superseded by cancel"),
            }
        }
    }

    /// Read the presented card.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the read fails.
    pub async fn read_card(&mut self, request: ReadRequest) -> Result<CardReadStep> {
        let event = self.request(ReaderCommand::ReadCard(request)).await?;
        into_read_step(CommandKind::ReadCard, event)
    }

    /// Continue a chip read with the chosen application.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the read fails.
    pub async fn select_application(&mut self, index: usize) -> Result<CardReadStep> {
        let event = self
            .request(ReaderCommand::SelectApplication { index })
            .await?;
        into_read_step(CommandKind::SelectApplication, event)
    }

    /// Query the battery charge.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the query fails.
    pub async fn battery_level(&mut self) -> Result<u8> {
        match self.request(ReaderCommand::BatteryLevel).await? {
            PeripheralEvent::BatteryLevel(level) => Ok(level),
            other => Err(unexpected(CommandKind::BatteryLevel, &other)),
        }
    }

    /// Release the reader.
    ///
    /// # Errors
    ///
    /// Returns the peripheral error if the disconnection fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.request(ReaderCommand::Disconnect).await? {
            PeripheralEvent::Disconnected => Ok(()),
            other => Err(unexpected(CommandKind::Disconnect, &other)),
        }
    }

    /// Whether a reader is connected, as last reported by the task.
    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Connected reader, as last reported by the task.
    pub fn reader_info(&self) -> Option<&ReaderInfo> {
        self.connected.as_ref()
    }

    /// Gracefully shut the peripheral task down.
    ///
    /// Closes the command channel, lets the task release the reader and waits
    /// for it to finish. Task errors and panics are logged, not returned.
    ///
    /// # Errors
    ///
    /// Never fails today; the `Result` keeps room for transports that can.
    pub async fn shutdown(mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        drop(self);

        match classify_task_result(task.await) {
            TaskTermination::Success | TaskTermination::Cancelled => {}
            TaskTermination::Error(message) => {
                warn!(error = %message, "Peripheral task ended with an error")
            }
            TaskTermination::Panic => error!("Peripheral task panicked"),
        }

        Ok(())
    }
}

impl std::fmt::Debug for ReaderLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderLink")
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

fn unexpected(command: CommandKind, event: &PeripheralEvent) -> PeripheralError {
    PeripheralError::invalid_data(format!("Unexpected answer to {}: {:?}", command, event))
}

fn into_read_step(command: CommandKind, event: PeripheralEvent) -> Result<CardReadStep> {
    match event {
        PeripheralEvent::CardRead(card) => Ok(CardReadStep::Completed(card)),
        PeripheralEvent::ApplicationSelectionRequired(choices) => {
            Ok(CardReadStep::ApplicationSelection(choices))
        }
        other => Err(unexpected(command, &other)),
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskTermination {
    /// Task completed successfully.
    Success,
    /// Task returned an error.
    Error(String),
    /// Task was cancelled.
    Cancelled,
    /// Task panicked.
    Panic,
}

fn classify_task_result(
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> TaskTermination {
    match result {
        Ok(Ok(())) => TaskTermination::Success,
        Ok(Err(e)) => TaskTermination::Error(e.to_string()),
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

/// Owns a card reader until it is moved into its peripheral task.
///
/// # Lifecycle
///
/// 1. Create the manager with a reader and configuration
/// 2. Call `start()` to spawn the task and get a [`ReaderLink`]
/// 3. Drive the reader through the link
/// 4. Call [`ReaderLink::shutdown`] (or drop the link) to release the reader
#[derive(Debug)]
pub struct ReaderManager {
    /// Reader to drive.
    device: AnyCardReader,

    /// Configuration.
    config: ReaderManagerConfig,
}

impl ReaderManager {
    /// Create a manager for a reader.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardflow_hardware::devices::AnyCardReader;
    /// use cardflow_hardware::manager::{ReaderManager, ReaderManagerConfig};
    /// use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
    ///
    /// let (reader, _handle) = MockCardReader::new(MockReaderConfig::default());
    /// let manager = ReaderManager::new(AnyCardReader::Mock(reader), ReaderManagerConfig::default());
    /// ```
    pub fn new(device: AnyCardReader, config: ReaderManagerConfig) -> Self {
        Self { device, config }
    }

    /// Spawn the peripheral task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an initialization error when called outside a tokio runtime.
    pub fn start(self) -> Result<ReaderLink> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PeripheralError::initialization_failed("no tokio runtime to run the peripheral task")
        })?;

        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let task = runtime.spawn(Self::peripheral_task(
            self.device,
            self.config,
            command_rx,
            event_tx,
        ));

        Ok(ReaderLink {
            command_tx,
            event_rx,
            task: Some(task),
            connected: None,
        })
    }

    async fn peripheral_task(
        mut device: AnyCardReader,
        config: ReaderManagerConfig,
        mut command_rx: mpsc::Receiver<ReaderCommand>,
        event_tx: mpsc::Sender<PeripheralEvent>,
    ) -> Result<()> {
        let mut interrupted: Option<ReaderCommand> = None;
        loop {
            let command = match interrupted.take() {
                Some(command) => command,
                None => match command_rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };
            let kind = command.kind();
            debug!(command = %kind, "Executing reader command");

            let event = match command {
                ReaderCommand::WaitForCard { timeout } => {
                    let (event, next) =
                        Self::wait_for_card(&mut device, timeout, &mut command_rx).await;
                    interrupted = next;
                    event
                }
                ReaderCommand::CancelWait => PeripheralEvent::WaitCancelled,
                other => Self::execute(&mut device, other, config.command_timeout).await,
            };

            if let PeripheralEvent::Failed { command, error } = &event {
                warn!(command = %command, error = %error, "Reader command failed");
            }

            if event_tx.send(event).await.is_err() {
                break; // Link dropped
            }
        }

        if device.is_connected() {
            debug!("Releasing reader on peripheral task exit");
            device.disconnect().await?;
        }

        Ok(())
    }

    async fn execute(
        device: &mut AnyCardReader,
        command: ReaderCommand,
        command_timeout: Duration,
    ) -> PeripheralEvent {
        let kind = command.kind();
        let bounded = Some(command_timeout);

        let result = match command {
            ReaderCommand::Discover => with_timeout(bounded, device.discover())
                .await
                .map(PeripheralEvent::ReadersDiscovered),
            ReaderCommand::Connect { name } => with_timeout(bounded, device.connect(&name))
                .await
                .map(PeripheralEvent::Connected),
            ReaderCommand::CheckReader => with_timeout(bounded, device.check_reader())
                .await
                .map(PeripheralEvent::ReaderChecked),
            ReaderCommand::Reset => with_timeout(bounded, device.reset())
                .await
                .map(|()| PeripheralEvent::ResetComplete),
            ReaderCommand::ReadCard(request) => {
                with_timeout(bounded, device.read_card(&request))
                    .await
                    .map(read_step_event)
            }
            ReaderCommand::SelectApplication { index } => {
                with_timeout(bounded, device.select_application(index))
                    .await
                    .map(read_step_event)
            }
            ReaderCommand::BatteryLevel => with_timeout(bounded, device.battery_level())
                .await
                .map(PeripheralEvent::BatteryLevel),
            ReaderCommand::Disconnect => with_timeout(bounded, device.disconnect())
                .await
                .map(|()| PeripheralEvent::Disconnected),
            ReaderCommand::WaitForCard { .. } | ReaderCommand::CancelWait => Err(
                PeripheralError::other(format!("{} is not a simple command", kind)),
            ),
        };

        result.unwrap_or_else(|error| PeripheralEvent::Failed {
            command: kind,
            error,
        })
    }

    /// Wait for a card until one is presented or another command arrives.
    ///
    /// A command other than [`ReaderCommand::CancelWait`] ends the wait with
    /// [`PeripheralEvent::WaitCancelled`] and is handed back to run next.
    async fn wait_for_card(
        device: &mut AnyCardReader,
        timeout: Option<Duration>,
        command_rx: &mut mpsc::Receiver<ReaderCommand>,
    ) -> (PeripheralEvent, Option<ReaderCommand>) {
        tokio::select! {
            result = with_timeout(timeout, device.wait_for_card()) => match result {
                Ok(method) => (PeripheralEvent::CardPresented(method), None),
                Err(error) => (
                    PeripheralEvent::Failed {
                        command: CommandKind::WaitForCard,
                        error,
                    },
                    None,
                ),
            },
            command = command_rx.recv() => match command {
                Some(ReaderCommand::CancelWait) | None => (PeripheralEvent::WaitCancelled, None),
                Some(other) => {
                    debug!(command = %other.kind(), "Card wait interrupted");
                    (PeripheralEvent::WaitCancelled, Some(other))
                }
            },
        }
    }
}

fn read_step_event(step: CardReadStep) -> PeripheralEvent {
    match step {
        CardReadStep::Completed(card) => PeripheralEvent::CardRead(card),
        CardReadStep::ApplicationSelection(choices) => {
            PeripheralEvent::ApplicationSelectionRequired(choices)
        }
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| {
                PeripheralError::timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
            })?,
        None => operation.await,
    }
}
