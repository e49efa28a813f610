//! In-memory payments provider for tests in this and downstream crates

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::provider::{
    NewCustomer, NewSubscription, PaymentsError, PaymentsProvider, ProviderCustomer,
    ProviderSubscription,
};

#[derive(Default)]
struct FakeState {
    reject_next: Option<String>,
    known: HashSet<String>,
    created: Vec<NewSubscription>,
    canceled: Vec<String>,
}

/// Accepts every request and reports subscriptions as `active`, unless told
/// to reject the next customer creation.
#[derive(Default)]
pub struct FakePayments {
    state: Mutex<FakeState>,
}

impl FakePayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_customer` call fail as a card decline
    pub fn reject_next(&self, message: &str) {
        self.lock().reject_next = Some(message.to_string());
    }

    /// Drop a subscription so cancelling it reports not-found
    pub fn forget(&self, subscription_id: &str) {
        self.lock().known.remove(subscription_id);
    }

    pub fn subscriptions_created(&self) -> Vec<NewSubscription> {
        self.lock().created.clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.lock().canceled.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentsProvider for FakePayments {
    async fn create_customer(
        &self,
        _customer: &NewCustomer,
    ) -> Result<ProviderCustomer, PaymentsError> {
        if let Some(message) = self.lock().reject_next.take() {
            return Err(PaymentsError::Rejected {
                code: Some("card_declined".to_string()),
                message,
            });
        }
        Ok(ProviderCustomer {
            id: format!("cus_{}", Uuid::new_v4().simple()),
        })
    }

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<ProviderSubscription, PaymentsError> {
        let id = format!("sub_{}", Uuid::new_v4().simple());
        let mut state = self.lock();
        state.known.insert(id.clone());
        state.created.push(subscription.clone());

        Ok(ProviderSubscription {
            client_secret: Some(format!("pi_{}_secret", id)),
            id,
            status: "active".to_string(),
        })
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, PaymentsError> {
        let mut state = self.lock();
        if !state.known.remove(subscription_id) {
            return Err(PaymentsError::NotFound(format!(
                "No such subscription: '{}'",
                subscription_id
            )));
        }
        state.canceled.push(subscription_id.to_string());

        Ok(ProviderSubscription {
            id: subscription_id.to_string(),
            status: "canceled".to_string(),
            client_secret: None,
        })
    }
}
