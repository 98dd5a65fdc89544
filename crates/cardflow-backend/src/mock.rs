//! Mock backend for testing and development.

use crate::client::BackendClient;
use crate::error::{BackendError, Result};
use cardflow_core::{AuthorizationInfo, PaymentInfo, PaymentToken};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Message of a simulated tokenization failure.
pub const MOCK_TOKENIZATION_FAILURE_MESSAGE: &str = "Mock tokenization failure";

/// Message of a simulated authorization failure.
pub const MOCK_AUTHORIZATION_FAILURE_MESSAGE: &str = "Mock authorization failure";

/// Authorization code issued by the mock backend.
pub const MOCK_AUTHORIZATION_CODE: &str = "MOCK00";

/// Behaviour of a [`MockBackendClient`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockBackendConfig {
    /// Every tokenization fails.
    pub tokenization_failure: bool,

    /// Every authorization fails.
    pub authorization_failure: bool,

    /// Simulated round-trip latency, in milliseconds.
    pub delay_ms: u64,
}

impl MockBackendConfig {
    /// Make every tokenization fail.
    pub fn with_tokenization_failure(mut self, enabled: bool) -> Self {
        self.tokenization_failure = enabled;
        self
    }

    /// Make every authorization fail.
    pub fn with_authorization_failure(mut self, enabled: bool) -> Self {
        self.authorization_failure = enabled;
        self
    }

    /// Set the simulated latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[derive(Debug, Default)]
struct MockBackendStats {
    tokenizations: AtomicUsize,
    authorizations: AtomicUsize,
}

/// Mock payment backend.
///
/// # Examples
///
/// ```
/// use cardflow_backend::{BackendClient, MockBackendClient, MockBackendConfig};
/// use cardflow_core::{PaymentInfo, PaymentMethod};
///
/// #[tokio::main]
/// async fn main() -> cardflow_backend::Result<()> {
///     let (client, handle) = MockBackendClient::new(MockBackendConfig::default());
///
///     let info = PaymentInfo::new(PaymentMethod::Swipe, "4111111111111111");
///     let token = client.tokenize(&info).await?;
///     assert!(token.id.starts_with("tok_"));
///     assert_eq!(handle.tokenize_count(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockBackendClient {
    config: MockBackendConfig,
    stats: Arc<MockBackendStats>,
}

impl MockBackendClient {
    /// Create a mock backend and the handle that observes it.
    pub fn new(config: MockBackendConfig) -> (Self, MockBackendHandle) {
        let stats = Arc::new(MockBackendStats::default());
        let client = Self {
            config,
            stats: Arc::clone(&stats),
        };
        (client, MockBackendHandle { stats })
    }

    async fn simulate_latency(&self) {
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
    }
}

impl BackendClient for MockBackendClient {
    async fn tokenize(&self, payment_info: &PaymentInfo) -> Result<PaymentToken> {
        self.simulate_latency().await;
        self.stats.tokenizations.fetch_add(1, Ordering::SeqCst);

        if self.config.tokenization_failure {
            return Err(BackendError::tokenization(MOCK_TOKENIZATION_FAILURE_MESSAGE));
        }

        let token = PaymentToken::new(format!("tok_{}", Uuid::new_v4().simple()));
        debug!(last_four = payment_info.last_four(), "Mock backend issued token");
        Ok(token)
    }

    async fn authorize(
        &self,
        payment_info: &PaymentInfo,
        token: &PaymentToken,
    ) -> Result<AuthorizationInfo> {
        self.simulate_latency().await;
        self.stats.authorizations.fetch_add(1, Ordering::SeqCst);

        if self.config.authorization_failure {
            return Err(BackendError::authorization(MOCK_AUTHORIZATION_FAILURE_MESSAGE));
        }

        let (Some(amount), Some(currency)) = (payment_info.amount, payment_info.currency) else {
            return Err(BackendError::invalid_request(
                "authorization requires an amount and a currency",
            ));
        };

        Ok(AuthorizationInfo {
            transaction_token: Uuid::new_v4().to_string(),
            token_id: token.id.clone(),
            authorization_code: MOCK_AUTHORIZATION_CODE.to_string(),
            amount,
            currency,
            authorized_at: Utc::now(),
        })
    }
}

/// Handle for observing a mock backend.
#[derive(Debug, Clone)]
pub struct MockBackendHandle {
    stats: Arc<MockBackendStats>,
}

impl MockBackendHandle {
    /// Number of tokenize calls received.
    pub fn tokenize_count(&self) -> usize {
        self.stats.tokenizations.load(Ordering::SeqCst)
    }

    /// Number of authorize calls received.
    pub fn authorize_count(&self) -> usize {
        self.stats.authorizations.load(Ordering::SeqCst)
    }
}
