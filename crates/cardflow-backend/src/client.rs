//! Backend client trait and dispatch wrapper.
//!
//! The engine only needs two round-trips: exchange a read for a token, and
//! authorize a payment with that token. HTTP transport, request signing and
//! retries belong to implementations.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::mock::MockBackendClient;
use cardflow_core::{AuthorizationInfo, PaymentInfo, PaymentToken};

/// Trait for payment backends.
///
/// Methods take `&self` so one client can serve consecutive transactions.
pub trait BackendClient: Send + Sync {
    /// Exchange a card read for an opaque token.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the card or cannot be reached.
    async fn tokenize(&self, payment_info: &PaymentInfo) -> Result<PaymentToken>;

    /// Request approval of a payment.
    ///
    /// `payment_info` must carry the amount and currency to authorize.
    ///
    /// # Errors
    ///
    /// Returns an error if the payment is declined or the backend cannot be
    /// reached.
    async fn authorize(
        &self,
        payment_info: &PaymentInfo,
        token: &PaymentToken,
    ) -> Result<AuthorizationInfo>;
}

/// Enum wrapper for backend dispatch.
///
/// Native `async fn` in traits are not object-safe; this gives the engine a
/// concrete type to hold.
///
/// # Examples
///
/// ```
/// use cardflow_backend::{AnyBackendClient, MockBackendClient, MockBackendConfig};
///
/// let (client, _handle) = MockBackendClient::new(MockBackendConfig::default());
/// let backend = AnyBackendClient::Mock(client);
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyBackendClient {
    /// Mock backend for development and testing.
    Mock(MockBackendClient),
}

impl From<MockBackendClient> for AnyBackendClient {
    fn from(client: MockBackendClient) -> Self {
        Self::Mock(client)
    }
}

impl BackendClient for AnyBackendClient {
    async fn tokenize(&self, payment_info: &PaymentInfo) -> Result<PaymentToken> {
        match self {
            Self::Mock(client) => client.tokenize(payment_info).await,
        }
    }

    async fn authorize(
        &self,
        payment_info: &PaymentInfo,
        token: &PaymentToken,
    ) -> Result<AuthorizationInfo> {
        match self {
            Self::Mock(client) => client.authorize(payment_info, token).await,
        }
    }
}
