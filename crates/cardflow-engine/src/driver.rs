//! Transaction driver.
//!
//! The driver is the single writer of a transaction. One tokio task owns the
//! reader link, the status machine and the transaction context for the whole
//! transaction, so every transition, policy decision and notification is
//! applied one at a time, with no lock around the machine.
//!
//! The task talks to three parties:
//!
//! - the peripheral task, through the [`ReaderLink`] (one event per command);
//! - the backend, through [`AnyBackendClient`];
//! - the session, through a control channel carrying stop requests and
//!   takeovers of a re-armed transaction.
//!
//! Handler notifications go out through the [`Dispatcher`]; decision answers
//! come back on one-shot channels.
//!
//! Control messages are only acted on at safe points: while waiting for a
//! card (immediately) and between steps (after the in-flight reader call,
//! backend call or decision completes).

use crate::context::TransactionContext;
use crate::decision::{
    Answer, ApplicationSelection, CardReaderSelection, PayerEmailRequest, ResetDecision,
    TransactionInfoRequest,
};
use crate::dispatcher::{Dispatcher, Notification};
use crate::handlers::HandlerSet;
use crate::policy::{self, Outcome, PolicyAction};
use crate::session::{Parts, Shared};
use crate::state_machine::StatusMachine;
use cardflow_backend::{AnyBackendClient, BackendClient, BackendError};
use cardflow_core::{
    CardReaderStatus, Error, ErrorDescriptor, ErrorKind, PaymentInfo, PaymentMethod,
    TransactionMode,
};
use cardflow_hardware::{CardReadStep, PeripheralError, PeripheralEvent, ReadRequest, ReaderLink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

/// Progress of a step: `Err` ends the attempt with an outcome that has
/// already been reported to the handlers.
type Step<T> = std::result::Result<T, Outcome>;

/// What an entry operation asks for.
#[derive(Debug, Clone)]
pub(crate) struct TransactionRequest {
    pub(crate) mode: TransactionMode,
    pub(crate) handlers: HandlerSet,
}

/// Message from the session to a running driver.
#[derive(Debug)]
pub(crate) enum Control {
    /// Cancel the transaction at the next safe point.
    Stop,

    /// Hand the re-armed transaction over to a new request.
    Replace(TransactionRequest),
}

/// Owner of one running transaction.
pub(crate) struct Driver {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    backend: Arc<AnyBackendClient>,
    link: ReaderLink,
    machine: StatusMachine,
    ctx: TransactionContext,
    control: mpsc::UnboundedReceiver<Control>,
    card_wait_timeout: Option<Duration>,
    cancel_requested: bool,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        dispatcher: Dispatcher,
        backend: Arc<AnyBackendClient>,
        parts: Parts,
        ctx: TransactionContext,
        control: mpsc::UnboundedReceiver<Control>,
        card_wait_timeout: Option<Duration>,
    ) -> Self {
        Self {
            shared,
            dispatcher,
            backend,
            link: parts.link,
            machine: parts.machine,
            ctx,
            control,
            card_wait_timeout,
            cancel_requested: false,
        }
    }

    /// Drive the transaction to its end and give the reader back to the session.
    pub(crate) async fn run(mut self) {
        info!(mode = %self.ctx.mode(), "Transaction started");

        let action = self.drive().await;
        let last_status = match action {
            PolicyAction::Stop => stop_reader(&mut self.link, &mut self.machine).await,
            PolicyAction::Idle | PolicyAction::Rearm => {
                if !self.link.is_connected() {
                    self.machine.reset();
                }
                None
            }
        };

        info!(
            attempts = self.ctx.attempt(),
            cancelled = self.cancel_requested,
            status = %self.machine.current_status(),
            "Transaction ended"
        );

        let parts = Parts {
            link: self.link,
            machine: self.machine,
            last_handlers: Some(self.ctx.handlers().clone()),
        };
        self.shared.finish_transaction(parts, &self.dispatcher, last_status);
    }

    async fn drive(&mut self) -> PolicyAction {
        if let Err(outcome) = self.setup().await {
            // Nothing to re-arm before the first card wait.
            return match self.decide(outcome) {
                PolicyAction::Rearm if self.ctx.policy().stop_reader_after_transaction => {
                    PolicyAction::Stop
                }
                PolicyAction::Rearm => PolicyAction::Idle,
                action => action,
            };
        }

        loop {
            let outcome = match self.attempt().await {
                Ok(outcome) | Err(outcome) => outcome,
            };
            self.poll_control();

            match self.decide(outcome) {
                PolicyAction::Rearm => continue,
                action => return action,
            }
        }
    }

    fn decide(&self, outcome: Outcome) -> PolicyAction {
        let action = policy::evaluate(self.ctx.policy(), outcome, self.cancel_requested);
        info!(
            attempt = self.ctx.attempt(),
            outcome = %outcome,
            action = ?action,
            "Attempt finished"
        );
        action
    }

    // ------------------------------------------------------------------
    // Setup: connect, check, transaction info
    // ------------------------------------------------------------------

    async fn setup(&mut self) -> Step<()> {
        self.connect().await?;
        self.check_safe_point()?;
        self.check_reader().await?;
        self.check_safe_point()?;

        if self.ctx.needs_transaction_info() {
            self.request_transaction_info().await?;
            self.check_safe_point()?;
        }

        Ok(())
    }

    async fn connect(&mut self) -> Step<()> {
        if self.link.is_connected() {
            debug!("Reusing connected card reader");
            return self.emit(CardReaderStatus::Connected);
        }

        let result = self.link.discover().await;
        let readers = result.map_err(|e| self.reader_failure(e))?;

        let remembered = self
            .shared
            .remembered_reader()
            .filter(|name| readers.contains(name));

        let name = match remembered {
            Some(name) => name,
            None if readers.len() > 1 => {
                let name = self.select_card_reader(readers).await?;
                self.check_safe_point()?;
                self.emit(CardReaderStatus::Connecting)?;
                name
            }
            None => match readers.into_iter().next() {
                Some(name) => name,
                None => {
                    return Err(self.report_reader_error(
                        ErrorDescriptor::card_reader_communication("No card reader found"),
                    ));
                }
            },
        };

        let result = self.link.connect(&name).await;
        let reader = result.map_err(|e| self.reader_failure(e))?;
        info!(reader = %reader.name, "Card reader connected");

        self.emit(CardReaderStatus::Connected)
    }

    async fn select_card_reader(&mut self, readers: Vec<String>) -> Step<String> {
        self.emit(CardReaderStatus::SelectingCardReader)?;

        let (selection, answer) = CardReaderSelection::channel(readers.len());
        self.notify(Notification::CardReaderSelection {
            readers: readers.clone(),
            selection,
        });
        let index = self.await_decision(answer, "card reader selection").await?;

        let Some(name) = readers.get(index).cloned() else {
            return Err(self.fault(Error::InvalidSelection {
                index,
                len: readers.len(),
            }));
        };

        debug!(reader = %name, "Card reader selected");
        self.shared.remember_reader(&name);
        Ok(name)
    }

    async fn check_reader(&mut self) -> Step<()> {
        self.emit(CardReaderStatus::CheckingReader)?;

        let result = self.link.check_reader().await;
        self.check_safe_point()?;
        let check = result.map_err(|e| self.reader_failure(e))?;

        if !check.reset_recommended {
            return Ok(());
        }

        let (decision, answer) = ResetDecision::channel();
        self.notify(Notification::ResetRequested(decision));
        if !self.await_decision(answer, "reader reset").await? {
            debug!("Reader reset declined");
            return Ok(());
        }

        self.check_safe_point()?;
        self.emit(CardReaderStatus::ConfiguringReader)?;
        let result = self.link.reset().await;
        self.check_safe_point()?;
        result.map_err(|e| self.reader_failure(e))?;
        info!("Card reader reset");

        Ok(())
    }

    async fn request_transaction_info(&mut self) -> Step<()> {
        let (request, answer) = TransactionInfoRequest::channel();
        self.notify(Notification::TransactionInfoRequested(request));
        let info = self.await_decision(answer, "transaction info").await?;

        debug!(
            amount = %info.amount,
            currency = %info.currency,
            reference_id = info.reference_id,
            "Transaction info confirmed"
        );
        self.ctx.set_transaction_info(info);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attempt: wait, read, backend
    // ------------------------------------------------------------------

    async fn attempt(&mut self) -> Step<Outcome> {
        let attempt = self.ctx.begin_attempt();
        if attempt > 1 {
            debug!(attempt, "Re-armed for another card");
            self.shared.set_rearmed(true);
        }

        self.emit(CardReaderStatus::WaitingForCard)?;
        let method = self.wait_for_card().await?;
        self.emit(method.presented_status())?;

        let payment_info = self.read_card(method).await?;
        self.check_safe_point()?;

        let payment_info = if self.ctx.mode().uses_backend() {
            let payment_info = self.request_payer_email(payment_info).await?;
            self.check_safe_point()?;
            payment_info
        } else {
            payment_info
        };

        if let Err(error) = self.ctx.record_payment_info(payment_info.clone()) {
            return Err(self.fault(error));
        }
        info!(
            method = %method,
            last_four = payment_info.last_four(),
            "Card read"
        );
        self.notify(Notification::ReadSucceeded(payment_info.clone()));

        if !self.ctx.mode().uses_backend() {
            return Ok(Outcome::Success);
        }

        Ok(self.exchange_with_backend(payment_info, method).await)
    }

    async fn wait_for_card(&mut self) -> Step<PaymentMethod> {
        let started = self.link.begin_wait_for_card(self.card_wait_timeout).await;
        let event = match started {
            Ok(()) => self.await_presentment().await?,
            Err(error) => Err(error),
        };

        self.shared.set_rearmed(false);

        // A takeover may have been accepted just before the card arrived.
        while let Some(control) = self.next_control() {
            match control {
                Control::Stop => return Err(self.cancel()),
                Control::Replace(request) => self.take_over(request).await?,
            }
        }

        match event {
            Ok(PeripheralEvent::CardPresented(method)) => {
                debug!(method = %method, "Card presented");
                Ok(method)
            }
            Ok(PeripheralEvent::Failed { error, .. }) | Err(error) => {
                Err(self.reader_failure(error))
            }
            Ok(PeripheralEvent::WaitCancelled) => Err(self.reader_failure(
                PeripheralError::cancelled("Card wait cancelled by the reader"),
            )),
            Ok(other) => Err(self.fault(Error::ReaderUnavailable(format!(
                "unexpected reader event while waiting for a card: {:?}",
                other
            )))),
        }
    }

    /// Wait for the pending card wait to answer, serving control messages
    /// in the meantime.
    async fn await_presentment(
        &mut self,
    ) -> Step<cardflow_hardware::Result<PeripheralEvent>> {
        loop {
            tokio::select! {
                event = self.link.recv() => return Ok(event),
                control = self.control.recv() => match control {
                    Some(Control::Replace(request)) => {
                        if let Err(outcome) = self.take_over(request).await {
                            self.abandon_wait().await;
                            return Err(outcome);
                        }
                    }
                    Some(Control::Stop) | None => {
                        self.shared.set_rearmed(false);
                        self.abandon_wait().await;
                        return Err(self.cancel());
                    }
                },
            }
        }
    }

    async fn abandon_wait(&mut self) {
        if let Err(error) = self.link.cancel_wait().await {
            warn!(error = %error, "Failed to interrupt card wait");
        }
    }

    /// Replace the re-armed transaction with a new request, keeping the reader.
    async fn take_over(&mut self, request: TransactionRequest) -> Step<()> {
        let previous = self.ctx.id();
        self.ctx = TransactionContext::new(request.mode, *self.ctx.policy(), request.handlers);
        self.ctx.begin_attempt();
        info!(
            previous = %previous,
            transaction_id = %self.ctx.id(),
            mode = %request.mode,
            "Re-armed transaction taken over"
        );

        if self.ctx.needs_transaction_info() {
            self.request_transaction_info().await?;
        }

        self.emit(CardReaderStatus::WaitingForCard)
    }

    async fn read_card(&mut self, method: PaymentMethod) -> Step<PaymentInfo> {
        let request = ReadRequest::new(method, self.ctx.mode())
            .with_transaction_info(self.ctx.transaction_info().cloned());

        let result = self.link.read_card(request).await;
        self.check_safe_point()?;
        let mut step = result.map_err(|e| self.reader_failure(e))?;

        let card = loop {
            match step {
                CardReadStep::Completed(card) => break card,
                CardReadStep::ApplicationSelection(applications) => {
                    let index = self.select_application(applications).await?;
                    self.check_safe_point()?;
                    let result = self.link.select_application(index).await;
                    self.check_safe_point()?;
                    step = result.map_err(|e| self.reader_failure(e))?;
                }
            }
        };

        let payment_info = card.into_payment_info();
        Ok(match self.ctx.transaction_info() {
            Some(info) => payment_info.with_transaction_info(info),
            None => payment_info,
        })
    }

    async fn select_application(&mut self, applications: Vec<String>) -> Step<usize> {
        if self.machine.current_status() != CardReaderStatus::SelectingApplication {
            self.emit(CardReaderStatus::SelectingApplication)?;
        }

        let (selection, answer) = ApplicationSelection::channel(applications.len());
        self.notify(Notification::ApplicationSelection {
            applications,
            selection,
        });
        self.await_decision(answer, "application selection").await
    }

    async fn request_payer_email(&mut self, payment_info: PaymentInfo) -> Step<PaymentInfo> {
        let (request, answer) = PayerEmailRequest::channel();
        self.notify(Notification::PayerEmailRequested(request));
        let email = self.await_decision(answer, "payer e-mail").await?;
        Ok(payment_info.with_email(email))
    }

    async fn exchange_with_backend(
        &mut self,
        payment_info: PaymentInfo,
        method: PaymentMethod,
    ) -> Outcome {
        let authorizes = self.ctx.mode().authorizes(method);
        let status = if authorizes {
            CardReaderStatus::Authorizing
        } else {
            CardReaderStatus::Tokenizing
        };
        if let Err(outcome) = self.emit(status) {
            return outcome;
        }

        let backend = Arc::clone(&self.backend);

        let tokenized = backend.tokenize(&payment_info).await;
        if let Err(outcome) = self.check_safe_point() {
            debug!("Discarding tokenization result after stop");
            return outcome;
        }
        let token = match tokenized {
            Ok(token) => token,
            Err(error) => return self.backend_failure(payment_info, error, authorizes),
        };
        if let Err(error) = self.ctx.record_token(token.clone()) {
            return self.fault(error);
        }

        if !authorizes {
            info!("Card tokenized");
            self.notify(Notification::TokenizationSucceeded {
                payment_info,
                token,
            });
            return Outcome::Success;
        }

        let authorized = backend.authorize(&payment_info, &token).await;
        if let Err(outcome) = self.check_safe_point() {
            debug!("Discarding authorization result after stop");
            return outcome;
        }
        let authorization = match authorized {
            Ok(authorization) => authorization,
            Err(error) => return self.backend_failure(payment_info, error, true),
        };
        if let Err(error) = self.ctx.record_authorization(authorization.clone()) {
            return self.fault(error);
        }

        info!(
            authorization_code = %authorization.authorization_code,
            amount = %authorization.amount,
            currency = %authorization.currency,
            "Payment authorized"
        );
        self.notify(Notification::AuthorizationSucceeded {
            payment_info,
            authorization,
        });
        Outcome::Success
    }

    // ------------------------------------------------------------------
    // Emission and failure reporting
    // ------------------------------------------------------------------

    fn emit(&mut self, status: CardReaderStatus) -> Step<()> {
        match self.machine.transition_to(status) {
            Ok(transition) => {
                debug!(from = %transition.from, to = %transition.to, "Status changed");
                self.notify(Notification::StatusChanged(status));
                Ok(())
            }
            Err(error) => Err(self.fault(error)),
        }
    }

    fn notify(&self, notification: Notification) {
        self.dispatcher.dispatch(self.ctx.handlers(), notification);
    }

    async fn await_decision<T>(&mut self, answer: Answer<T>, decision: &str) -> Step<T> {
        match answer.await {
            Ok(value) => Ok(value),
            Err(_) => {
                let message = format!("The {} decision was dropped without an answer", decision);
                warn!(decision, "Handler contract violation");
                self.notify(Notification::ReadFailed(ErrorDescriptor::contract_violation(
                    message,
                )));
                Err(Outcome::Aborted)
            }
        }
    }

    fn reader_failure(&mut self, error: PeripheralError) -> Outcome {
        if error.is_disconnect() {
            warn!(error = %error, "Card reader lost");
            if self.machine.can_transition_to(CardReaderStatus::NotConnected) {
                self.emit(CardReaderStatus::NotConnected).ok();
            } else {
                self.machine.reset();
            }
            self.notify(Notification::ReadFailed(error.into()));
            return Outcome::ReaderLost;
        }

        self.report_reader_error(error.into())
    }

    fn report_reader_error(&self, descriptor: ErrorDescriptor) -> Outcome {
        warn!(error = %descriptor, "Card reader error");
        let outcome = if descriptor.kind == ErrorKind::Cancelled {
            Outcome::Cancelled
        } else {
            Outcome::ReaderError
        };
        self.notify(Notification::ReadFailed(descriptor));
        outcome
    }

    fn backend_failure(
        &self,
        payment_info: PaymentInfo,
        error: BackendError,
        authorizes: bool,
    ) -> Outcome {
        let error = ErrorDescriptor::from(error);
        warn!(error = %error, "Backend round-trip failed");

        let notification = if authorizes {
            Notification::AuthorizationFailed {
                payment_info,
                error,
            }
        } else {
            Notification::TokenizationFailed {
                payment_info,
                error,
            }
        };
        self.notify(notification);
        Outcome::BackendError
    }

    fn fault(&self, error: Error) -> Outcome {
        error!(error = %error, "Transaction aborted");
        self.notify(Notification::ReadFailed(ErrorDescriptor::unknown(
            error.to_string(),
        )));
        Outcome::Aborted
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    fn next_control(&mut self) -> Option<Control> {
        match self.control.try_recv() {
            Ok(control) => Some(control),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Control::Stop),
        }
    }

    fn cancel(&mut self) -> Outcome {
        if !self.cancel_requested {
            info!("Transaction cancelled");
        }
        self.cancel_requested = true;
        Outcome::Cancelled
    }

    fn check_safe_point(&mut self) -> Step<()> {
        if self.poll_control() {
            return Err(self.cancel());
        }
        Ok(())
    }

    /// Drain pending control messages, returning whether a stop is pending.
    fn poll_control(&mut self) -> bool {
        while let Some(control) = self.next_control() {
            match control {
                Control::Stop => {
                    self.cancel();
                }
                Control::Replace(request) => warn!(
                    mode = %request.mode,
                    "Takeover arrived after the card wait ended, ignoring"
                ),
            }
        }
        self.cancel_requested
    }
}

/// Emit `STOPPED` and release the reader.
///
/// Returns the status to announce, or `None` when nothing was connected.
/// The caller announces it once the reader is back with the session.
pub(crate) async fn stop_reader(
    link: &mut ReaderLink,
    machine: &mut StatusMachine,
) -> Option<CardReaderStatus> {
    if !link.is_connected() {
        if machine.current_status() != CardReaderStatus::NotConnected {
            machine.reset();
        }
        return None;
    }

    if let Err(error) = link.disconnect().await {
        warn!(error = %error, "Failed to release card reader");
    }

    match machine.transition_to(CardReaderStatus::Stopped) {
        Ok(_) => {
            info!("Card reader stopped");
            Some(CardReaderStatus::Stopped)
        }
        Err(error) => {
            error!(error = %error, "Cannot stop card reader");
            None
        }
    }
}
