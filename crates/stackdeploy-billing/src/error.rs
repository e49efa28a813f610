use sea_orm::DbErr;
use stackdeploy_auth::AuthError;
use stackdeploy_catalog::CatalogError;
use stackdeploy_core::error_builder::{
    bad_request, internal_server_error, not_found, payment_rejected, transport_error,
};
use stackdeploy_core::problemdetails::Problem;
use thiserror::Error;

use crate::provider::PaymentsError;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Payments(#[from] PaymentsError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Subscription {0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<SubscriptionError> for Problem {
    fn from(error: SubscriptionError) -> Self {
        match error {
            SubscriptionError::Catalog(e) => e.into(),
            SubscriptionError::Auth(e) => e.into(),
            SubscriptionError::Payments(PaymentsError::Rejected { code, message }) => {
                let mut builder = payment_rejected().detail(message);
                if let Some(code) = code {
                    builder = builder.value("provider_code", code);
                }
                builder.build()
            }
            SubscriptionError::Payments(PaymentsError::NotFound(message)) => not_found()
                .title("Provider Resource Not Found")
                .detail(message)
                .build(),
            SubscriptionError::Payments(PaymentsError::Transport(message)) => {
                transport_error().detail(message).build()
            }
            SubscriptionError::NotFound(_) => not_found()
                .title("Subscription Not Found")
                .detail(error.to_string())
                .build(),
            SubscriptionError::Validation(message) => bad_request().detail(message).build(),
            SubscriptionError::Database(e) => {
                tracing::error!("Database error in billing: {}", e);
                internal_server_error()
                    .detail("A database error occurred")
                    .build()
            }
        }
    }
}
