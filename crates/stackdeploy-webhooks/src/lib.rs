//! Signed provider callbacks: Stripe subscription/invoice events and droplet
//! status reports, both feeding the deployment update history.

mod error;
mod plugin;
mod service;
pub mod handlers;
pub mod signature;

pub use error::WebhookError;
pub use plugin::WebhooksPlugin;
pub use service::{InfrastructureEvent, StripeEvent, StripeOutcome, WebhookService};
