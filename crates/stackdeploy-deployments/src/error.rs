use sea_orm::DbErr;
use stackdeploy_auth::AuthError;
use stackdeploy_billing::SubscriptionError;
use stackdeploy_catalog::CatalogError;
use stackdeploy_core::error_builder::{
    bad_request, conflict, internal_server_error, not_found, provisioning_failed,
    transport_error,
};
use stackdeploy_core::problemdetails::Problem;
use stackdeploy_entities::types::{DeploymentStatus, SubscriptionStatus};
use thiserror::Error;

use crate::provider::InfrastructureError;

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Deployment {0} not found")]
    NotFound(String),

    #[error("Subscription {subscription_id} is {status}, not active")]
    SubscriptionInactive {
        subscription_id: String,
        status: SubscriptionStatus,
    },

    #[error("Cannot move deployment from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<DeploymentError> for Problem {
    fn from(error: DeploymentError) -> Self {
        match error {
            DeploymentError::Catalog(e) => e.into(),
            DeploymentError::Subscription(e) => e.into(),
            DeploymentError::Auth(e) => e.into(),
            DeploymentError::Infrastructure(InfrastructureError::Transport(message)) => {
                transport_error().detail(message).build()
            }
            DeploymentError::Infrastructure(e) => provisioning_failed().detail(e.to_string()).build(),
            DeploymentError::NotFound(_) => not_found()
                .title("Deployment Not Found")
                .detail(error.to_string())
                .build(),
            DeploymentError::SubscriptionInactive { .. } => conflict()
                .title("Subscription Inactive")
                .detail(error.to_string())
                .build(),
            DeploymentError::InvalidTransition { .. } => conflict()
                .title("Invalid Status Transition")
                .detail(error.to_string())
                .build(),
            DeploymentError::Validation(message) => bad_request().detail(message).build(),
            DeploymentError::Database(e) => {
                tracing::error!("Database error in deployments: {}", e);
                internal_server_error()
                    .detail("A database error occurred")
                    .build()
            }
        }
    }
}
