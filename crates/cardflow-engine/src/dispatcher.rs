//! Callback dispatcher.
//!
//! Every handler invocation of a session goes through one dedicated thread.
//! The transaction driver queues `(handlers, notification)` pairs; the thread
//! drains them strictly in submission order, so handlers never see two
//! callbacks at once or out of order, and never run on the async runtime.
//!
//! ```text
//!   driver task ── dispatch() ──► unbounded queue ──► "cardflow-callbacks" thread ──► handlers
//! ```
//!
//! [`Dispatcher::flush`] queues a barrier behind everything already queued,
//! so callers can wait for the last callbacks of a transaction.
//!
//! A panicking handler is logged and skipped; later notifications are still
//! delivered. If the panic drops a decision continuation, the waiting
//! transaction sees the drop as a contract violation.

use crate::decision::{
    ApplicationSelection, CardReaderSelection, PayerEmailRequest, ResetDecision,
    TransactionInfoRequest,
};
use crate::handlers::HandlerSet;
use cardflow_core::constants::CALLBACK_THREAD_NAME;
use cardflow_core::{
    AuthorizationInfo, CardReaderStatus, Error, ErrorDescriptor, PaymentInfo, PaymentToken, Result,
};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace, warn};

/// A single handler invocation.
#[derive(Debug)]
pub enum Notification {
    /// Reader Handler status change.
    StatusChanged(CardReaderStatus),

    /// Reader Handler read success.
    ReadSucceeded(PaymentInfo),

    /// Reader Handler error.
    ReadFailed(ErrorDescriptor),

    /// Reader Handler card reader selection.
    CardReaderSelection {
        readers: Vec<String>,
        selection: CardReaderSelection,
    },

    /// Reader Handler application selection.
    ApplicationSelection {
        applications: Vec<String>,
        selection: ApplicationSelection,
    },

    /// Reader Handler reset decision.
    ResetRequested(ResetDecision),

    /// Reader Handler transaction info request.
    TransactionInfoRequested(TransactionInfoRequest),

    /// Reader Handler payer e-mail request.
    PayerEmailRequested(PayerEmailRequest),

    /// Tokenization Handler success.
    TokenizationSucceeded {
        payment_info: PaymentInfo,
        token: PaymentToken,
    },

    /// Tokenization Handler error.
    TokenizationFailed {
        payment_info: PaymentInfo,
        error: ErrorDescriptor,
    },

    /// Authorization Handler success.
    AuthorizationSucceeded {
        payment_info: PaymentInfo,
        authorization: AuthorizationInfo,
    },

    /// Authorization Handler error.
    AuthorizationFailed {
        payment_info: PaymentInfo,
        error: ErrorDescriptor,
    },
}

impl Notification {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status_changed",
            Self::ReadSucceeded(_) => "read_succeeded",
            Self::ReadFailed(_) => "read_failed",
            Self::CardReaderSelection { .. } => "card_reader_selection",
            Self::ApplicationSelection { .. } => "application_selection",
            Self::ResetRequested(_) => "reset_requested",
            Self::TransactionInfoRequested(_) => "transaction_info_requested",
            Self::PayerEmailRequested(_) => "payer_email_requested",
            Self::TokenizationSucceeded { .. } => "tokenization_succeeded",
            Self::TokenizationFailed { .. } => "tokenization_failed",
            Self::AuthorizationSucceeded { .. } => "authorization_succeeded",
            Self::AuthorizationFailed { .. } => "authorization_failed",
        }
    }
}

enum Delivery {
    Notify(HandlerSet, Notification),
    Barrier(oneshot::Sender<()>),
}

/// Queue feeding the callback thread.
///
/// Clones share the same thread. The thread exits once every clone is
/// dropped and the queue is drained.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<Delivery>,
}

impl Dispatcher {
    /// Spawn the callback thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::CallbackDelivery` if the thread cannot be spawned.
    pub fn new() -> Result<Self> {
        let (queue, deliveries) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name(CALLBACK_THREAD_NAME.to_string())
            .spawn(move || run(deliveries))
            .map_err(|e| Error::CallbackDelivery(e.to_string()))?;

        Ok(Self { queue })
    }

    /// Queue a notification for `handlers`.
    ///
    /// Never blocks. If the callback thread is gone the notification is
    /// dropped with a warning, which also drops any continuation it carries.
    pub fn dispatch(&self, handlers: &HandlerSet, notification: Notification) {
        let name = notification.name();
        trace!(notification = name, "Queueing notification");
        if self
            .queue
            .send(Delivery::Notify(handlers.clone(), notification))
            .is_err()
        {
            warn!(
                notification = name,
                "Callback thread is gone, dropping notification"
            );
        }
    }

    /// Wait until every notification queued before this call was delivered.
    ///
    /// Returns immediately if the callback thread is gone.
    pub async fn flush(&self) {
        let (done, delivered) = oneshot::channel();
        if self.queue.send(Delivery::Barrier(done)).is_err() {
            return;
        }
        // Closed only if the thread exited first.
        let _ = delivered.await;
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}

fn run(mut deliveries: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = deliveries.blocking_recv() {
        let (handlers, notification) = match delivery {
            Delivery::Notify(handlers, notification) => (handlers, notification),
            Delivery::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
        };

        let name = notification.name();
        let result = panic::catch_unwind(AssertUnwindSafe(|| deliver(&handlers, notification)));
        if result.is_err() {
            error!(notification = name, "Handler panicked");
        }
    }
    trace!("Callback thread exiting");
}

fn deliver(handlers: &HandlerSet, notification: Notification) {
    let reader = &handlers.reader;

    match notification {
        Notification::StatusChanged(status) => reader.on_status_change(status),
        Notification::ReadSucceeded(payment_info) => reader.on_success(payment_info),
        Notification::ReadFailed(error) => reader.on_error(error),
        Notification::CardReaderSelection { readers, selection } => {
            reader.on_card_reader_selection(readers, selection)
        }
        Notification::ApplicationSelection {
            applications,
            selection,
        } => reader.on_application_selection(applications, selection),
        Notification::ResetRequested(decision) => reader.on_reader_reset_requested(decision),
        Notification::TransactionInfoRequested(request) => {
            reader.on_transaction_info_requested(request)
        }
        Notification::PayerEmailRequested(request) => reader.on_payer_email_requested(request),
        Notification::TokenizationSucceeded {
            payment_info,
            token,
        } => match &handlers.tokenization {
            Some(handler) => handler.on_success(payment_info, token),
            None => warn!("No tokenization handler for tokenization success"),
        },
        Notification::TokenizationFailed {
            payment_info,
            error,
        } => match &handlers.tokenization {
            Some(handler) => handler.on_error(payment_info, error),
            None => warn!(error = %error, "No tokenization handler for tokenization error"),
        },
        Notification::AuthorizationSucceeded {
            payment_info,
            authorization,
        } => match &handlers.authorization {
            Some(handler) => handler.on_authorization_success(payment_info, authorization),
            None => warn!("No authorization handler for authorization success"),
        },
        Notification::AuthorizationFailed {
            payment_info,
            error,
        } => match &handlers.authorization {
            Some(handler) => handler.on_authorization_error(payment_info, error),
            None => warn!(error = %error, "No authorization handler for authorization error"),
        },
    }
}
