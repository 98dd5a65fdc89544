//! Common test utilities for transaction flow tests.
//!
//! [`Recorder`] implements every handler trait and forwards each callback as
//! an [`Event`] into a channel, answering decision points from its
//! [`Answers`]. [`Events`] reads the channel back with timeouts so a stuck
//! transaction fails the test instead of hanging it.

#![allow(dead_code)]

use cardflow_backend::{MockBackendClient, MockBackendConfig, MockBackendHandle};
use cardflow_core::{
    AuthorizationInfo, CardReaderStatus, Config, CurrencyCode, Environment, Error,
    ErrorDescriptor, PaymentInfo, PaymentToken, PolicyConfig,
};
use cardflow_engine::{
    ApplicationSelection, AuthorizationHandler, CardReaderSelection, PayerEmailRequest,
    PaymentSession, ReaderHandler, ResetDecision, TokenizationHandler, TransactionInfoRequest,
};
use cardflow_hardware::mock::{MockCardReader, MockCardReaderHandle, MockReaderConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const TEST_CLIENT_ID: &str = "171482";
pub const TEST_AMOUNT: Decimal = dec!(24.61);
pub const TEST_REFERENCE_ID: u64 = 1170640190;
pub const TEST_EMAIL: &str = "a@b.com";

/// Longest a single callback may take to arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Quiet period after which no further callbacks are expected.
pub const SETTLE_PERIOD: Duration = Duration::from_millis(200);

/// One handler callback.
#[derive(Debug, Clone)]
pub enum Event {
    Status(CardReaderStatus),
    ReadSuccess(PaymentInfo),
    ReadError(ErrorDescriptor),
    CardReaderSelection(Vec<String>),
    ApplicationSelection(Vec<String>),
    ApplicationSelectionPending(ApplicationSelection),
    DuplicateAnswer(Result<(), Error>),
    ResetRequested,
    ResetPending(ResetDecision),
    TransactionInfoRequested,
    PayerEmailRequested,
    Tokenized(PaymentToken),
    TokenizationError(ErrorDescriptor),
    Authorized(AuthorizationInfo),
    AuthorizationError(ErrorDescriptor),
}

/// How the recorder answers decision points.
#[derive(Debug, Clone)]
pub struct Answers {
    /// Index picked among several readers.
    pub reader_index: usize,

    /// Pick the last application offered; `false` drops the selection.
    pub select_application: bool,

    /// Resolve the application selection a second time.
    pub answer_application_twice: bool,

    /// Hand the application selection to the test instead of answering.
    pub defer_application_selection: bool,

    /// Accept a recommended reset.
    pub confirm_reset: bool,

    /// Hand the reset decision to the test instead of answering.
    pub defer_reset: bool,

    /// Answer transaction info requests; `false` drops them.
    pub provide_transaction_info: bool,

    /// Payer e-mail to attach.
    pub email: Option<&'static str>,
}

impl Default for Answers {
    fn default() -> Self {
        Self {
            reader_index: 0,
            select_application: true,
            answer_application_twice: false,
            defer_application_selection: false,
            confirm_reset: false,
            defer_reset: false,
            provide_transaction_info: true,
            email: Some(TEST_EMAIL),
        }
    }
}

/// Handler recording every callback it receives.
pub struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    answers: Answers,
}

impl Recorder {
    fn record(&self, event: Event) {
        // The test may have finished reading.
        let _ = self.events.send(event);
    }
}

impl ReaderHandler for Recorder {
    fn on_status_change(&self, status: CardReaderStatus) {
        self.record(Event::Status(status));
    }

    fn on_success(&self, payment_info: PaymentInfo) {
        self.record(Event::ReadSuccess(payment_info));
    }

    fn on_error(&self, error: ErrorDescriptor) {
        self.record(Event::ReadError(error));
    }

    fn on_card_reader_selection(&self, readers: Vec<String>, selection: CardReaderSelection) {
        self.record(Event::CardReaderSelection(readers));
        selection.select(self.answers.reader_index).unwrap();
    }

    fn on_application_selection(&self, applications: Vec<String>, selection: ApplicationSelection) {
        let last = applications.len() - 1;
        self.record(Event::ApplicationSelection(applications));
        if self.answers.defer_application_selection {
            self.record(Event::ApplicationSelectionPending(selection));
            return;
        }
        if !self.answers.select_application {
            return;
        }

        let duplicate = selection.clone();
        selection.select(last).unwrap();
        if self.answers.answer_application_twice {
            self.record(Event::DuplicateAnswer(duplicate.select(0)));
        }
    }

    fn on_reader_reset_requested(&self, decision: ResetDecision) {
        self.record(Event::ResetRequested);
        if self.answers.defer_reset {
            self.record(Event::ResetPending(decision));
            return;
        }
        decision.confirm(self.answers.confirm_reset).unwrap();
    }

    fn on_transaction_info_requested(&self, request: TransactionInfoRequest) {
        self.record(Event::TransactionInfoRequested);
        if self.answers.provide_transaction_info {
            request
                .provide(TEST_AMOUNT, CurrencyCode::Usd, TEST_REFERENCE_ID)
                .unwrap();
        }
    }

    fn on_payer_email_requested(&self, request: PayerEmailRequest) {
        self.record(Event::PayerEmailRequested);
        request.provide(self.answers.email).unwrap();
    }
}

impl TokenizationHandler for Recorder {
    fn on_success(&self, _payment_info: PaymentInfo, token: PaymentToken) {
        self.record(Event::Tokenized(token));
    }

    fn on_error(&self, _payment_info: PaymentInfo, error: ErrorDescriptor) {
        self.record(Event::TokenizationError(error));
    }
}

impl AuthorizationHandler for Recorder {
    fn on_authorization_success(&self, _payment_info: PaymentInfo, authorization: AuthorizationInfo) {
        self.record(Event::Authorized(authorization));
    }

    fn on_authorization_error(&self, _payment_info: PaymentInfo, error: ErrorDescriptor) {
        self.record(Event::AuthorizationError(error));
    }
}

/// The recorder as an authorization handler.
pub fn authorizer(handler: &Arc<Recorder>) -> Option<Arc<dyn AuthorizationHandler>> {
    Some(Arc::clone(handler) as Arc<dyn AuthorizationHandler>)
}

/// Receiving side of a [`Recorder`].
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    /// Next callback, failing the test after [`EVENT_TIMEOUT`].
    pub async fn next(&mut self) -> Event {
        timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("Callback timeout")
            .expect("Recorder dropped")
    }

    /// Callbacks up to and including the first one matching `stop`.
    pub async fn until(&mut self, stop: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = self.next().await;
            let done = stop(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// Callbacks up to and including the given status.
    pub async fn until_status(&mut self, status: CardReaderStatus) -> Vec<Event> {
        self.until(|event| matches!(event, Event::Status(s) if *s == status))
            .await
    }

    /// Callbacks already received, without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Every callback that arrives before the recorder goes quiet.
    pub async fn settle(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout(SETTLE_PERIOD, self.rx.recv()).await {
            events.push(event);
        }
        events
    }
}

pub fn recorder(answers: Answers) -> (Arc<Recorder>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(Recorder {
            events: tx,
            answers,
        }),
        Events { rx },
    )
}

/// Status changes among `events`, in order.
pub fn statuses(events: &[Event]) -> Vec<CardReaderStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Status(status) => Some(*status),
            _ => None,
        })
        .collect()
}

/// Reader Handler errors among `events`.
pub fn read_errors(events: &[Event]) -> Vec<ErrorDescriptor> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ReadError(error) => Some(error.clone()),
            _ => None,
        })
        .collect()
}

/// Successful reads among `events`.
pub fn read_successes(events: &[Event]) -> Vec<PaymentInfo> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ReadSuccess(info) => Some(info.clone()),
            _ => None,
        })
        .collect()
}

pub fn config(policy: PolicyConfig) -> Config {
    Config::new(TEST_CLIENT_ID, Environment::Stage).with_policy(policy)
}

pub fn policy(
    restart_after_success: bool,
    restart_after_other_errors: bool,
    stop_reader_after_transaction: bool,
) -> PolicyConfig {
    PolicyConfig {
        restart_after_success,
        restart_after_other_errors,
        restart_after_backend_errors: false,
        stop_reader_after_transaction,
    }
}

/// A session over mock peripherals, with the handles that drive them.
pub struct Harness {
    pub session: PaymentSession,
    pub reader: MockCardReaderHandle,
    pub backend: MockBackendHandle,
}

pub fn harness(config: Config, reader: MockReaderConfig, backend: MockBackendConfig) -> Harness {
    let (reader_device, reader) = MockCardReader::new(reader);
    let (backend_client, backend) = MockBackendClient::new(backend);
    let session = PaymentSession::new(config, reader_device.into(), backend_client.into())
        .expect("Failed to create session");

    Harness {
        session,
        reader,
        backend,
    }
}

/// Wait until the session is idle, failing the test after [`EVENT_TIMEOUT`].
pub async fn wait_idle(session: &PaymentSession) {
    timeout(EVENT_TIMEOUT, session.wait_until_idle())
        .await
        .expect("Session did not become idle");
}
