//! Handler printing every callback to the console.

use cardflow_core::{
    AuthorizationInfo, CardReaderStatus, CurrencyCode, ErrorDescriptor, PaymentInfo, PaymentToken,
};
use cardflow_engine::{
    ApplicationSelection, AuthorizationHandler, CardReaderSelection, PayerEmailRequest,
    ReaderHandler, ResetDecision, TokenizationHandler, TransactionInfoRequest,
};
use rust_decimal::Decimal;
use tracing::warn;

/// Answers the console gives at decision points.
#[derive(Debug, Clone)]
pub struct ConsoleAnswers {
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub reference_id: u64,
    pub email: Option<String>,
    pub confirm_reset: bool,
    pub reader_index: usize,
    pub application_index: usize,
}

#[derive(Debug)]
pub struct ConsoleHandler {
    answers: ConsoleAnswers,
}

impl ConsoleHandler {
    pub fn new(answers: ConsoleAnswers) -> Self {
        Self { answers }
    }
}

fn describe(payment_info: &PaymentInfo) -> String {
    let mut line = format!(
        "{} card {}",
        payment_info.payment_method, payment_info.masked_pan
    );
    if let Some(label) = &payment_info.application_label {
        line.push_str(&format!(" ({})", label));
    }
    if let (Some(amount), Some(currency)) = (payment_info.amount, payment_info.currency) {
        line.push_str(&format!(" for {} {}", amount, currency));
    }
    line
}

impl ReaderHandler for ConsoleHandler {
    fn on_status_change(&self, status: CardReaderStatus) {
        println!("[status] {}", status);
    }

    fn on_success(&self, payment_info: PaymentInfo) {
        println!("[read] {}", describe(&payment_info));
    }

    fn on_error(&self, error: ErrorDescriptor) {
        println!("[error] {}", error);
    }

    fn on_card_reader_selection(&self, readers: Vec<String>, selection: CardReaderSelection) {
        println!("[select reader] {:?} -> {}", readers, self.answers.reader_index);
        if let Err(error) = selection.select(self.answers.reader_index) {
            warn!(error = %error, "Card reader selection rejected");
        }
    }

    fn on_application_selection(&self, applications: Vec<String>, selection: ApplicationSelection) {
        println!(
            "[select application] {:?} -> {}",
            applications, self.answers.application_index
        );
        if let Err(error) = selection.select(self.answers.application_index) {
            warn!(error = %error, "Application selection rejected");
        }
    }

    fn on_reader_reset_requested(&self, decision: ResetDecision) {
        println!("[reset] reader recommends a reset -> {}", self.answers.confirm_reset);
        if let Err(error) = decision.confirm(self.answers.confirm_reset) {
            warn!(error = %error, "Reset decision rejected");
        }
    }

    fn on_transaction_info_requested(&self, request: TransactionInfoRequest) {
        let answers = &self.answers;
        println!(
            "[transaction] {} {} ref {}",
            answers.amount, answers.currency, answers.reference_id
        );
        if let Err(error) = request.provide(answers.amount, answers.currency, answers.reference_id)
        {
            println!("[transaction] rejected: {}", error);
        }
    }

    fn on_payer_email_requested(&self, request: PayerEmailRequest) {
        if let Err(error) = request.provide(self.answers.email.as_deref()) {
            println!("[e-mail] rejected: {}", error);
        }
    }
}

impl TokenizationHandler for ConsoleHandler {
    fn on_success(&self, payment_info: PaymentInfo, token: PaymentToken) {
        println!("[tokenized] {} -> {}", describe(&payment_info), token.id);
    }

    fn on_error(&self, payment_info: PaymentInfo, error: ErrorDescriptor) {
        println!("[tokenization failed] {}: {}", describe(&payment_info), error);
    }
}

impl AuthorizationHandler for ConsoleHandler {
    fn on_authorization_success(&self, payment_info: PaymentInfo, authorization: AuthorizationInfo) {
        println!(
            "[authorized] {} -> code {}",
            describe(&payment_info),
            authorization.authorization_code
        );
    }

    fn on_authorization_error(&self, payment_info: PaymentInfo, error: ErrorDescriptor) {
        println!("[authorization failed] {}: {}", describe(&payment_info), error);
    }
}
