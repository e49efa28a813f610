use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use stackdeploy_auth::RateLimiter;
use stackdeploy_catalog::TemplateCatalog;
use stackdeploy_config::ServerConfig;
use stackdeploy_core::plugin::{
    PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext, StackPlugin,
};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{self, BillingApiDoc, BillingState};
use crate::{PaymentsProvider, StripeClient, SubscriptionService};

/// Wires the Stripe client and subscription service into the application.
#[derive(Default)]
pub struct BillingPlugin;

impl BillingPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl StackPlugin for BillingPlugin {
    fn name(&self) -> &'static str {
        "billing"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let config = context.require_service::<ServerConfig>()?;
            let catalog = context.require_service::<TemplateCatalog>()?;
            let rate_limiter = context.require_service::<RateLimiter>()?;

            let stripe =
                StripeClient::with_base_url(&config.stripe_secret_key, &config.stripe_api_base)
                    .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            let payments: Arc<dyn PaymentsProvider> = Arc::new(stripe);

            let subscription_service =
                Arc::new(SubscriptionService::new(db, catalog, payments.clone()));

            context.register_service(payments);
            context.register_service(subscription_service.clone());
            context.register_service(Arc::new(BillingState {
                subscription_service,
                rate_limiter,
            }));

            tracing::debug!("Billing plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<BillingState>();
        Some(PluginRoutes::new(
            handlers::configure_routes().with_state(state),
        ))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(BillingApiDoc::openapi())
    }
}
