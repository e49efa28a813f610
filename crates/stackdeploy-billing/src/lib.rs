//! Subscription broker: purchases recurring plans at the payments provider
//! and keeps the local `subscriptions` table in step with it.

mod error;
mod plugin;
mod provider;
mod service;
mod stripe;
pub mod handlers;
pub mod test_utils;

pub use error::SubscriptionError;
pub use plugin::BillingPlugin;
pub use provider::{
    NewCustomer, NewSubscription, PaymentsError, PaymentsProvider, ProviderCustomer,
    ProviderSubscription,
};
pub use service::{find_owned_subscription, CreatedSubscription, SubscriptionService};
pub use stripe::StripeClient;
