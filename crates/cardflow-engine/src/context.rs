//! Transaction context.
//!
//! One [`TransactionContext`] exists per active transaction. Its identity,
//! mode, policy and handlers are fixed when the entry operation is invoked;
//! the attempt data (payment info, token, authorization) is recorded at most
//! once per attempt and cleared when the transaction re-arms.

use crate::handlers::HandlerSet;
use cardflow_core::{
    AuthorizationInfo, Error, PaymentInfo, PaymentToken, PolicyConfig, Result, TransactionInfo,
    TransactionMode,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Data produced by one attempt.
#[derive(Debug, Clone, Default)]
pub struct AttemptData {
    /// Read result.
    pub payment_info: Option<PaymentInfo>,

    /// Backend token.
    pub token: Option<PaymentToken>,

    /// Backend authorization.
    pub authorization: Option<AuthorizationInfo>,
}

/// State of the single in-flight transaction.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    id: Uuid,
    mode: TransactionMode,
    policy: PolicyConfig,
    handlers: HandlerSet,
    transaction_info: Option<TransactionInfo>,
    attempt: u32,
    started_at: DateTime<Utc>,
    data: AttemptData,
}

impl TransactionContext {
    /// Create the context for a new transaction.
    pub fn new(mode: TransactionMode, policy: PolicyConfig, handlers: HandlerSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            policy,
            handlers,
            transaction_info: None,
            attempt: 0,
            started_at: Utc::now(),
            data: AttemptData::default(),
        }
    }

    /// Transaction identifier, for logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Transaction mode.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Restart and stop policy.
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Handlers of the transaction.
    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    /// When the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current attempt number, starting at 1 once the first card is awaited.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Amount, currency and reference confirmed by the caller.
    pub fn transaction_info(&self) -> Option<&TransactionInfo> {
        self.transaction_info.as_ref()
    }

    /// Whether transaction info must still be requested.
    pub fn needs_transaction_info(&self) -> bool {
        self.mode.uses_backend() && self.transaction_info.is_none()
    }

    /// Remember the caller's transaction info for every attempt.
    pub fn set_transaction_info(&mut self, info: TransactionInfo) {
        self.transaction_info = Some(info);
    }

    /// Data recorded in the current attempt.
    pub fn data(&self) -> &AttemptData {
        &self.data
    }

    /// Start a new attempt, discarding the previous attempt's data.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.data = AttemptData::default();
        self.attempt
    }

    /// Record the read result of this attempt.
    ///
    /// # Errors
    ///
    /// Returns `Error::AttemptDataAlreadyRecorded` if a read was already
    /// recorded in this attempt.
    pub fn record_payment_info(&mut self, payment_info: PaymentInfo) -> Result<()> {
        record(&mut self.data.payment_info, payment_info, "payment info")
    }

    /// Record the token of this attempt.
    ///
    /// # Errors
    ///
    /// Returns `Error::AttemptDataAlreadyRecorded` if a token was already
    /// recorded in this attempt.
    pub fn record_token(&mut self, token: PaymentToken) -> Result<()> {
        record(&mut self.data.token, token, "payment token")
    }

    /// Record the authorization of this attempt.
    ///
    /// # Errors
    ///
    /// Returns `Error::AttemptDataAlreadyRecorded` if an authorization was
    /// already recorded in this attempt.
    pub fn record_authorization(&mut self, authorization: AuthorizationInfo) -> Result<()> {
        record(&mut self.data.authorization, authorization, "authorization")
    }
}

fn record<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::AttemptDataAlreadyRecorded(what.to_string()));
    }
    *slot = Some(value);
    Ok(())
}
