use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use stackdeploy_core::error_builder::unauthorized;
use stackdeploy_core::problemdetails::Problem;

use crate::context::AuthFailure;
use crate::AuthContext;

/// Extractor for routes that need a verified caller.
pub struct RequireAuth(pub AuthContext);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = Problem;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            return Ok(RequireAuth(ctx.clone()));
        }

        let detail = parts
            .extensions
            .get::<AuthFailure>()
            .map(|f| f.0.clone())
            .unwrap_or_else(|| "Missing bearer token".to_string());

        Err(unauthorized()
            .title("Authentication Required")
            .detail(detail)
            .build())
    }
}
