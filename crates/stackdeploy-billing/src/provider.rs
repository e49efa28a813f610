//! Payments provider abstraction
//!
//! The subscription service only talks to the provider through this trait so
//! it can be exercised against a fake in tests.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentsError {
    /// The provider refused the request (card declined, invalid parameters).
    /// The message is the provider's own wording.
    #[error("{message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("Payments provider resource not found: {0}")]
    NotFound(String),

    /// The provider could not be reached or failed on its side
    #[error("Payments provider unavailable: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub user_id: String,
    pub email: String,
    pub payment_method_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCustomer {
    pub id: String,
}

/// A monthly USD subscription priced inline
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub customer_id: String,
    pub user_id: String,
    pub plan_type: String,
    pub template_id: String,
    pub product_name: String,
    /// USD cents per month
    pub unit_amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscription {
    pub id: String,
    /// Provider status string (`active`, `incomplete`, ...)
    pub status: String,
    /// Client secret of the first invoice's payment intent, when one exists
    pub client_secret: Option<String>,
}

#[async_trait]
pub trait PaymentsProvider: Send + Sync {
    /// Create a customer with the payment method attached and set as the
    /// default invoice method
    async fn create_customer(&self, customer: &NewCustomer)
        -> Result<ProviderCustomer, PaymentsError>;

    /// Start a recurring monthly subscription for an existing customer
    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<ProviderSubscription, PaymentsError>;

    /// Cancel a subscription immediately
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, PaymentsError>;
}
