use stackdeploy_billing::SubscriptionError;
use stackdeploy_core::error_builder::{bad_request, internal_server_error};
use stackdeploy_core::problemdetails::Problem;
use stackdeploy_deployments::DeploymentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Missing {0} header")]
    MissingSignature(&'static str),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature timestamp is outside the tolerance ({age_secs}s old)")]
    StaleTimestamp { age_secs: i64 },

    #[error("Webhook secret {0} is not configured")]
    NotConfigured(&'static str),

    #[error("Invalid webhook payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

impl From<WebhookError> for Problem {
    fn from(error: WebhookError) -> Self {
        match error {
            WebhookError::MissingSignature(_)
            | WebhookError::InvalidSignature(_)
            | WebhookError::StaleTimestamp { .. } => bad_request()
                .title("Webhook Error")
                .detail(error.to_string())
                .build(),
            WebhookError::Payload(_) => bad_request()
                .title("Invalid Webhook Payload")
                .detail(error.to_string())
                .build(),
            WebhookError::NotConfigured(_) => {
                tracing::error!("{}", error);
                internal_server_error()
                    .detail("Webhook intake is not configured")
                    .build()
            }
            WebhookError::Subscription(e) => e.into(),
            WebhookError::Deployment(e) => e.into(),
        }
    }
}
