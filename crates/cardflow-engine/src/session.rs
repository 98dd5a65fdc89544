//! Payment session: the entry operations.
//!
//! A [`PaymentSession`] owns one card reader, one backend client and one
//! callback thread. It runs at most one transaction at a time; each
//! transaction is driven by its own task that borrows the reader from the
//! session and gives it back when the transaction ends.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use cardflow_backend::{MockBackendClient, MockBackendConfig};
//! use cardflow_core::{CardReaderStatus, Config, Environment, ErrorDescriptor, PaymentInfo};
//! use cardflow_engine::{PaymentSession, ReaderHandler};
//! use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
//!
//! struct PrintHandler;
//!
//! impl ReaderHandler for PrintHandler {
//!     fn on_status_change(&self, status: CardReaderStatus) {
//!         println!("status: {status}");
//!     }
//!
//!     fn on_success(&self, payment_info: PaymentInfo) {
//!         println!("read card ending {}", payment_info.last_four());
//!     }
//!
//!     fn on_error(&self, error: ErrorDescriptor) {
//!         println!("error: {error}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> cardflow_core::Result<()> {
//!     let (reader, _reader_handle) = MockCardReader::new(MockReaderConfig::default());
//!     let (backend, _backend_handle) = MockBackendClient::new(MockBackendConfig::default());
//!
//!     let session = PaymentSession::new(
//!         Config::new("171482", Environment::Stage),
//!         reader.into(),
//!         backend.into(),
//!     )?;
//!
//!     session.start_transaction_for_reading(Arc::new(PrintHandler))?;
//!     session.wait_until_idle().await;
//!     Ok(())
//! }
//! ```

use crate::context::TransactionContext;
use crate::dispatcher::{Dispatcher, Notification};
use crate::driver::{self, Control, Driver, TransactionRequest};
use crate::handlers::{AuthorizationHandler, HandlerSet, ReaderHandler, TokenizationHandler};
use crate::state_machine::{SharedStatus, StatusMachine};
use cardflow_backend::AnyBackendClient;
use cardflow_core::{CardReaderStatus, Config, Error, Result, TransactionMode};
use cardflow_hardware::{AnyCardReader, ReaderLink, ReaderManager, ReaderManagerConfig};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tracing::{Instrument, debug, info, info_span, warn};

/// Reader-side resources lent to whichever task currently drives the reader.
pub(crate) struct Parts {
    pub(crate) link: ReaderLink,
    pub(crate) machine: StatusMachine,
    pub(crate) last_handlers: Option<HandlerSet>,
}

struct ActiveTransaction {
    control: mpsc::UnboundedSender<Control>,
    rearmed: bool,
}

struct SessionState {
    /// `None` while a task is using the reader.
    parts: Option<Parts>,
    active: Option<ActiveTransaction>,
    remembered_reader: Option<String>,
}

/// State shared between the session and its transaction tasks.
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    idle: Notify,
}

impl Shared {
    fn new(parts: Parts) -> Self {
        Self {
            state: Mutex::new(SessionState {
                parts: Some(parts),
                active: None,
                remembered_reader: None,
            }),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn remembered_reader(&self) -> Option<String> {
        self.lock().remembered_reader.clone()
    }

    pub(crate) fn remember_reader(&self, name: &str) {
        self.lock().remembered_reader = Some(name.to_string());
    }

    pub(crate) fn set_rearmed(&self, rearmed: bool) {
        if let Some(active) = self.lock().active.as_mut() {
            active.rearmed = rearmed;
        }
    }

    /// Take the reader back from a finished transaction.
    ///
    /// The final status is announced under the session lock, so it always
    /// precedes the first status of the next transaction.
    pub(crate) fn finish_transaction(
        &self,
        parts: Parts,
        dispatcher: &Dispatcher,
        final_status: Option<CardReaderStatus>,
    ) {
        let mut state = self.lock();
        state.active = None;
        Self::put_back(&mut state, parts, dispatcher, final_status);
        drop(state);
        self.idle.notify_waiters();
    }

    /// Take the reader back from a maintenance task.
    fn restore(
        &self,
        parts: Parts,
        dispatcher: &Dispatcher,
        final_status: Option<CardReaderStatus>,
    ) {
        let mut state = self.lock();
        Self::put_back(&mut state, parts, dispatcher, final_status);
        drop(state);
        self.idle.notify_waiters();
    }

    fn put_back(
        state: &mut SessionState,
        parts: Parts,
        dispatcher: &Dispatcher,
        final_status: Option<CardReaderStatus>,
    ) {
        if let (Some(status), Some(handlers)) = (final_status, parts.last_handlers.as_ref()) {
            dispatcher.dispatch(handlers, Notification::StatusChanged(status));
        }
        state.parts = Some(parts);
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.active.is_none() && state.parts.is_some()
    }
}

/// Entry point for card-present transactions.
///
/// Dropping the session cancels the active transaction, if any.
pub struct PaymentSession {
    config: Config,
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    backend: Arc<AnyBackendClient>,
    status: SharedStatus,
    runtime: Handle,
}

impl PaymentSession {
    /// Create a session around a card reader and a backend client.
    ///
    /// Must be called from within a tokio runtime; transactions run on it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration,
    /// `Error::NoRuntime` outside a tokio runtime and
    /// `Error::CallbackDelivery` if the callback thread cannot start.
    pub fn new(config: Config, reader: AnyCardReader, backend: AnyBackendClient) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let manager = ReaderManager::new(
            reader,
            ReaderManagerConfig {
                command_timeout: config.reader_command_timeout(),
            },
        );
        let link = manager
            .start()
            .map_err(|e| Error::ReaderUnavailable(e.to_string()))?;
        let dispatcher = Dispatcher::new()?;

        let machine = StatusMachine::new();
        let status = machine.shared_status();
        let shared = Arc::new(Shared::new(Parts {
            link,
            machine,
            last_handlers: None,
        }));

        info!(
            client_id = %config.client_id,
            environment = %config.environment,
            "Payment session created"
        );

        Ok(Self {
            config,
            shared,
            dispatcher,
            backend: Arc::new(backend),
            status,
            runtime,
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read a card without any backend round-trip.
    ///
    /// Progress, the read result and errors go to `reader`.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionInProgress` if a transaction is active and
    /// not re-armed waiting for a card.
    pub fn start_transaction_for_reading(&self, reader: Arc<dyn ReaderHandler>) -> Result<()> {
        self.start(TransactionRequest {
            mode: TransactionMode::ReadOnly,
            handlers: HandlerSet::reading(reader),
        })
    }

    /// Read a card and tokenize it; authorize chip reads when an
    /// authorization handler is supplied.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionInProgress` if a transaction is active and
    /// not re-armed waiting for a card.
    pub fn start_transaction_for_tokenizing(
        &self,
        reader: Arc<dyn ReaderHandler>,
        tokenization: Arc<dyn TokenizationHandler>,
        authorization: Option<Arc<dyn AuthorizationHandler>>,
    ) -> Result<()> {
        let mode = if authorization.is_some() {
            TransactionMode::TokenizeAndAuthorize
        } else {
            TransactionMode::TokenizeOnly
        };

        self.start(TransactionRequest {
            mode,
            handlers: HandlerSet::tokenizing(reader, tokenization, authorization),
        })
    }

    fn start(&self, request: TransactionRequest) -> Result<()> {
        let mut state = self.shared.lock();

        if let Some(active) = state.active.as_mut() {
            if !active.rearmed {
                debug!(mode = %request.mode, "Rejecting start while a transaction is active");
                return Err(Error::TransactionInProgress);
            }
            active.rearmed = false;
            return active
                .control
                .send(Control::Replace(request))
                .map_err(|_| Error::TransactionInProgress);
        }

        let Some(parts) = state.parts.take() else {
            debug!(mode = %request.mode, "Rejecting start while the reader is busy");
            return Err(Error::TransactionInProgress);
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        state.active = Some(ActiveTransaction {
            control: control_tx,
            rearmed: false,
        });
        drop(state);

        let ctx = TransactionContext::new(request.mode, self.config.policy, request.handlers);
        let span = info_span!("transaction", transaction_id = %ctx.id());
        let driver = Driver::new(
            Arc::clone(&self.shared),
            self.dispatcher.clone(),
            Arc::clone(&self.backend),
            parts,
            ctx,
            control_rx,
            self.config.card_wait_timeout(),
        );
        self.runtime.spawn(driver.run().instrument(span));

        Ok(())
    }

    /// Stop the card reader.
    ///
    /// During a transaction this cancels it at the next safe point: the
    /// transaction emits `STOPPED`, releases the reader and never restarts.
    /// When idle with a connected reader, emits `STOPPED` to the last
    /// transaction's Reader Handler and releases the reader. Otherwise does
    /// nothing.
    ///
    /// Returns once the request is accepted; use
    /// [`wait_until_idle`](Self::wait_until_idle) to wait for the reader.
    pub fn stop_card_reader(&self) {
        let mut state = self.shared.lock();

        if let Some(active) = state.active.as_ref() {
            info!("Stop requested");
            if active.control.send(Control::Stop).is_err() {
                warn!("Transaction already finishing, stop ignored");
            }
            return;
        }

        let connected = state.parts.as_ref().is_some_and(|p| p.link.is_connected());
        if !connected {
            return;
        }
        let Some(mut parts) = state.parts.take() else {
            return;
        };
        drop(state);

        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        self.runtime.spawn(async move {
            let final_status = driver::stop_reader(&mut parts.link, &mut parts.machine).await;
            shared.restore(parts, &dispatcher, final_status);
        });
    }

    /// Battery charge of the card reader, in percent.
    ///
    /// Connects to the remembered (or first discovered) reader for the query
    /// if none is connected, and releases it again afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionInProgress` while a transaction is active
    /// and `Error::ReaderUnavailable` if the reader cannot be reached.
    pub async fn card_reader_battery_level(&self) -> Result<u8> {
        let (parts, remembered) = {
            let mut state = self.shared.lock();
            if state.active.is_some() {
                return Err(Error::TransactionInProgress);
            }
            let parts = state.parts.take().ok_or(Error::TransactionInProgress)?;
            (parts, state.remembered_reader.clone())
        };

        // Run detached so the reader goes back to the session even if the
        // caller stops polling.
        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        let query = self.runtime.spawn(async move {
            let mut parts = parts;
            let level = query_battery(&mut parts.link, remembered).await;
            shared.restore(parts, &dispatcher, None);
            level
        });

        query
            .await
            .map_err(|e| Error::ReaderUnavailable(e.to_string()))?
            .map_err(|e| Error::ReaderUnavailable(e.to_string()))
    }

    /// Last status emitted by the card reader.
    pub fn current_status(&self) -> CardReaderStatus {
        self.status.get()
    }

    /// Name of the reader picked in the last card reader selection.
    pub fn remembered_card_reader(&self) -> Option<String> {
        self.shared.remembered_reader()
    }

    /// Forget the remembered reader; the next discovery of several readers
    /// asks again.
    pub fn forget_remembered_card_reader(&self) {
        if let Some(name) = self.shared.lock().remembered_reader.take() {
            debug!(reader = %name, "Forgot remembered card reader");
        }
    }

    /// Whether a transaction is running.
    pub fn is_transaction_active(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Wait until no transaction runs and the reader is back with the session.
    pub async fn wait_until_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.shared.is_idle() {
                return;
            }
            idle.await;
        }
    }

    /// Wait until every callback queued so far has been delivered.
    ///
    /// Once [`wait_until_idle`](Self::wait_until_idle) returns, the last
    /// callbacks of the finished transaction are queued; this waits for them.
    pub async fn flush_callbacks(&self) {
        self.dispatcher.flush().await;
    }
}

impl Drop for PaymentSession {
    fn drop(&mut self) {
        if let Some(active) = self.shared.lock().active.as_ref() {
            let _ = active.control.send(Control::Stop);
        }
    }
}

impl fmt::Debug for PaymentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentSession")
            .field("client_id", &self.config.client_id)
            .field("status", &self.current_status())
            .field("active", &self.is_transaction_active())
            .finish_non_exhaustive()
    }
}

async fn query_battery(
    link: &mut ReaderLink,
    remembered: Option<String>,
) -> cardflow_hardware::Result<u8> {
    if link.is_connected() {
        return link.battery_level().await;
    }

    let readers = link.discover().await?;
    let name = remembered
        .filter(|name| readers.contains(name))
        .or_else(|| readers.into_iter().next())
        .ok_or_else(|| cardflow_hardware::PeripheralError::disconnected("no card reader in range"))?;

    link.connect(&name).await?;
    let level = link.battery_level().await;
    if let Err(error) = link.disconnect().await {
        warn!(error = %error, "Failed to release card reader after battery query");
    }
    level
}
