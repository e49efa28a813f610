//! Auth plugin: bearer-token verification middleware, the per-user rate
//! limiter and the caller profile endpoints.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use stackdeploy_config::ServerConfig;
use stackdeploy_core::plugin::{
    PluginContext, PluginError, PluginMiddlewareCollection, PluginRoutes,
    ServiceRegistrationContext, StackPlugin,
};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{self, AuthState, UserApiDoc};
use crate::{AuthMiddleware, JwtVerifier, RateLimiter, UserProfileService};

#[derive(Default)]
pub struct AuthPlugin;

impl AuthPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl StackPlugin for AuthPlugin {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let config = context.require_service::<ServerConfig>()?;

            let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
            let rate_limiter = Arc::new(RateLimiter::new());
            let user_service = Arc::new(UserProfileService::new(db));

            context.register_service(verifier);
            context.register_service(rate_limiter.clone());
            context.register_service(user_service.clone());
            context.register_service(Arc::new(AuthState {
                user_service,
                rate_limiter,
            }));

            tracing::debug!("Auth plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<AuthState>();
        Some(PluginRoutes::new(
            handlers::configure_routes().with_state(state),
        ))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(UserApiDoc::openapi())
    }

    fn configure_middleware(&self, context: &PluginContext) -> Option<PluginMiddlewareCollection> {
        let verifier = context.require_service::<JwtVerifier>();
        let mut collection = PluginMiddlewareCollection::new();
        collection.add_stack_middleware(Arc::new(AuthMiddleware::new(verifier)));
        Some(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackdeploy_database::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_auth_plugin_requires_database_and_config() {
        let context = ServiceRegistrationContext::new();
        let result = AuthPlugin::new().register_services(&context).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_auth_plugin_registers_services() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;
        let context = ServiceRegistrationContext::new();
        context.register_service(test_db.db.clone());
        context.register_service(Arc::new(ServerConfig {
            jwt_secret: "secret".to_string(),
            ..Default::default()
        }));

        AuthPlugin::new().register_services(&context).await?;

        assert!(context.get_service::<JwtVerifier>().is_some());
        assert!(context.get_service::<RateLimiter>().is_some());
        assert!(context.get_service::<AuthState>().is_some());
        Ok(())
    }
}
