//! Transaction engine for card-present payments.
//!
//! The engine drives one card reader through a transaction: connect, check,
//! wait for a card, read it, optionally tokenize and authorize it with the
//! backend, then stop, idle or re-arm for the next card according to the
//! session policy. Progress and decisions reach the caller through handler
//! traits invoked on a dedicated callback thread.
//!
//! Start with [`PaymentSession`].

pub mod context;
pub mod decision;
pub mod dispatcher;
mod driver;
pub mod handlers;
pub mod policy;
pub mod session;
pub mod state_machine;

pub use context::{AttemptData, TransactionContext};
pub use decision::{
    Answer, ApplicationSelection, CardReaderSelection, PayerEmailRequest, ResetDecision,
    TransactionInfoRequest,
};
pub use dispatcher::{Dispatcher, Notification};
pub use handlers::{AuthorizationHandler, HandlerSet, ReaderHandler, TokenizationHandler};
pub use policy::{Outcome, PolicyAction};
pub use session::PaymentSession;
pub use state_machine::{SharedStatus, StatusMachine, StatusTransition};
