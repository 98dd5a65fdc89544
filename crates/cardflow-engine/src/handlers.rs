//! Handler contracts implemented by the caller.
//!
//! A transaction reports to up to three handlers, each an independent
//! capability:
//!
//! - [`ReaderHandler`]: status changes, read results, reader errors and every
//!   decision point. Always required.
//! - [`TokenizationHandler`]: tokenization outcome in tokenize-only mode.
//! - [`AuthorizationHandler`]: authorization outcome when the transaction
//!   authorizes.
//!
//! All callbacks run on the session's callback thread, one at a time, in the
//! order the transaction produced them. A callback that blocks delays every
//! later callback of the session, so decisions that take time should keep a
//! clone of the continuation and answer it later from elsewhere.

use crate::decision::{
    ApplicationSelection, CardReaderSelection, PayerEmailRequest, ResetDecision,
    TransactionInfoRequest,
};
use cardflow_core::{
    AuthorizationInfo, CardReaderStatus, ErrorDescriptor, PaymentInfo, PaymentToken,
};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Receives reader progress and answers decision points.
///
/// The decision callbacks have defaults so read-only callers only implement
/// what they need:
///
/// | decision | default |
/// |---|---|
/// | card reader selection | first reader |
/// | application selection | first application |
/// | reader reset | declined |
/// | transaction info | none (the transaction fails with a contract violation) |
/// | payer e-mail | skipped |
pub trait ReaderHandler: Send + Sync {
    /// The card reader status changed.
    fn on_status_change(&self, status: CardReaderStatus);

    /// A card was read successfully.
    fn on_success(&self, payment_info: PaymentInfo);

    /// The reader failed, the card was declined, or a decision went unanswered.
    fn on_error(&self, error: ErrorDescriptor);

    /// Several readers are in range; pick one.
    fn on_card_reader_selection(&self, readers: Vec<String>, selection: CardReaderSelection) {
        let _ = readers;
        if let Err(error) = selection.select(0) {
            warn!(error = %error, "Default card reader selection failed");
        }
    }

    /// The card offers several EMV applications; pick one.
    fn on_application_selection(&self, applications: Vec<String>, selection: ApplicationSelection) {
        let _ = applications;
        if let Err(error) = selection.select(0) {
            warn!(error = %error, "Default application selection failed");
        }
    }

    /// The reader recommends a reset before reading.
    fn on_reader_reset_requested(&self, decision: ResetDecision) {
        if let Err(error) = decision.confirm(false) {
            warn!(error = %error, "Default reset decision failed");
        }
    }

    /// A tokenizing transaction needs the amount, currency and reference.
    fn on_transaction_info_requested(&self, request: TransactionInfoRequest) {
        drop(request);
    }

    /// A tokenizing transaction may attach the payer's e-mail.
    fn on_payer_email_requested(&self, request: PayerEmailRequest) {
        if let Err(error) = request.provide(None) {
            warn!(error = %error, "Default payer e-mail answer failed");
        }
    }
}

/// Receives the outcome of tokenize-only transactions.
pub trait TokenizationHandler: Send + Sync {
    /// The backend issued a token for the card.
    fn on_success(&self, payment_info: PaymentInfo, token: PaymentToken);

    /// The backend refused to tokenize the card.
    fn on_error(&self, payment_info: PaymentInfo, error: ErrorDescriptor);
}

/// Receives the outcome of authorizing transactions.
pub trait AuthorizationHandler: Send + Sync {
    /// The payment was authorized.
    fn on_authorization_success(&self, payment_info: PaymentInfo, authorization: AuthorizationInfo);

    /// Tokenization or authorization failed.
    fn on_authorization_error(&self, payment_info: PaymentInfo, error: ErrorDescriptor);
}

/// Handlers supplied to one entry operation.
#[derive(Clone)]
pub struct HandlerSet {
    /// Reader progress and decisions.
    pub reader: Arc<dyn ReaderHandler>,

    /// Tokenization outcome, for tokenizing transactions.
    pub tokenization: Option<Arc<dyn TokenizationHandler>>,

    /// Authorization outcome, for authorizing transactions.
    pub authorization: Option<Arc<dyn AuthorizationHandler>>,
}

impl HandlerSet {
    /// Handlers for a read-only transaction.
    pub fn reading(reader: Arc<dyn ReaderHandler>) -> Self {
        Self {
            reader,
            tokenization: None,
            authorization: None,
        }
    }

    /// Handlers for a tokenizing transaction.
    pub fn tokenizing(
        reader: Arc<dyn ReaderHandler>,
        tokenization: Arc<dyn TokenizationHandler>,
        authorization: Option<Arc<dyn AuthorizationHandler>>,
    ) -> Self {
        Self {
            reader,
            tokenization: Some(tokenization),
            authorization,
        }
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("tokenization", &self.tokenization.is_some())
            .field("authorization", &self.authorization.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StatusOnly {
        statuses: Mutex<Vec<CardReaderStatus>>,
    }

    impl ReaderHandler for StatusOnly {
        fn on_status_change(&self, status: CardReaderStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        fn on_success(&self, _payment_info: PaymentInfo) {}

        fn on_error(&self, _error: ErrorDescriptor) {}
    }

    #[tokio::test]
    async fn test_default_decisions() {
        let handler = StatusOnly::default();

        let (selection, answer) = ApplicationSelection::channel(2);
        handler.on_application_selection(vec!["A".into(), "B".into()], selection);
        assert_eq!(answer.await.unwrap(), 0);

        let (decision, answer) = ResetDecision::channel();
        handler.on_reader_reset_requested(decision);
        assert!(!answer.await.unwrap());

        let (request, answer) = PayerEmailRequest::channel();
        handler.on_payer_email_requested(request);
        assert_eq!(answer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_default_transaction_info_is_unanswered() {
        let handler = StatusOnly::default();
        let (request, answer) = TransactionInfoRequest::channel();
        handler.on_transaction_info_requested(request);
        assert!(answer.await.is_err());
    }

    #[test]
    fn test_handler_set_debug_hides_handlers() {
        let set = HandlerSet::reading(Arc::new(StatusOnly::default()));
        let debug = format!("{:?}", set);
        assert!(debug.contains("tokenization: false"));
    }
}
