use sea_orm::DbErr;
use stackdeploy_core::error_builder::{
    bad_request, conflict, internal_server_error, too_many_requests, unauthorized,
};
use stackdeploy_core::problemdetails::Problem;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Rate limit exceeded for {bucket}, retry in {retry_after_secs}s")]
    RateLimited {
        bucket: String,
        retry_after_secs: u64,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<AuthError> for Problem {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingToken | AuthError::TokenExpired | AuthError::InvalidToken(_) => {
                unauthorized().detail(error.to_string()).build()
            }
            AuthError::RateLimited {
                ref bucket,
                retry_after_secs,
            } => too_many_requests()
                .detail(format!("Too many requests to {}", bucket))
                .value("retry_after", retry_after_secs)
                .build(),
            AuthError::Conflict(message) => conflict().detail(message).build(),
            AuthError::Validation(message) => bad_request().detail(message).build(),
            AuthError::Database(e) => {
                tracing::error!("Database error in auth: {}", e);
                internal_server_error()
                    .detail("A database error occurred")
                    .build()
            }
        }
    }
}
