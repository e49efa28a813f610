//! Bearer token authentication for every request outside the webhook routes.
//!
//! The middleware never rejects on its own. A verified caller is attached to
//! the request as an [`AuthContext`]; otherwise the failure reason is
//! attached and [`crate::RequireAuth`] turns it into a 401 on protected routes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use stackdeploy_core::plugin::{MiddlewareCondition, MiddlewarePriority, StackMiddleware};
use tracing::debug;

use crate::context::AuthFailure;
use crate::token::bearer_token;
use crate::JwtVerifier;

pub struct AuthMiddleware {
    verifier: Arc<JwtVerifier>,
}

impl AuthMiddleware {
    pub fn new(verifier: Arc<JwtVerifier>) -> Self {
        Self { verifier }
    }

    fn authenticate(&self, req: &mut Request) {
        let header = match req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        {
            Some(header) => header.to_string(),
            None => return,
        };

        let Some(token) = bearer_token(&header) else {
            req.extensions_mut()
                .insert(AuthFailure("Authorization header must use the Bearer scheme".into()));
            return;
        };

        match self.verifier.verify(token) {
            Ok(ctx) => {
                debug!("Authenticated request for user {}", ctx.user_id);
                req.extensions_mut().insert(ctx);
            }
            Err(e) => {
                debug!("Rejected bearer token: {}", e);
                req.extensions_mut().insert(AuthFailure(e.to_string()));
            }
        }
    }
}

impl StackMiddleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth_middleware"
    }

    fn plugin_name(&self) -> &'static str {
        "auth"
    }

    fn priority(&self) -> MiddlewarePriority {
        MiddlewarePriority::Security
    }

    /// Webhooks authenticate by signature, not bearer token
    fn condition(&self) -> MiddlewareCondition {
        MiddlewareCondition::ExceptPathPrefix("/webhook/".to_string())
    }

    fn execute<'a>(
        &'a self,
        mut req: Request,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Result<Response, StatusCode>> + Send + 'a>> {
        Box::pin(async move {
            self.authenticate(&mut req);
            Ok(next.run(req).await)
        })
    }
}
