use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stackdeploy_billing::SubscriptionService;
use stackdeploy_config::ServerConfig;
use stackdeploy_core::plugin::{
    PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext, StackPlugin,
};
use stackdeploy_deployments::DeploymentService;
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{self, WebhooksApiDoc};
use crate::WebhookService;

#[derive(Default)]
pub struct WebhooksPlugin;

impl WebhooksPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl StackPlugin for WebhooksPlugin {
    fn name(&self) -> &'static str {
        "webhooks"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let config = context.require_service::<ServerConfig>()?;
            let subscriptions = context.require_service::<SubscriptionService>()?;
            let deployments = context.require_service::<DeploymentService>()?;

            if config.stripe_webhook_secret.is_empty() {
                tracing::warn!("STRIPE_WEBHOOK_SECRET is not set; Stripe webhooks will be refused");
            }
            if config.infra_webhook_secret.is_empty() {
                tracing::warn!(
                    "INFRA_WEBHOOK_SECRET is not set; infrastructure webhooks will be refused"
                );
            }

            context.register_service(Arc::new(WebhookService::new(
                subscriptions,
                deployments,
                config.stripe_webhook_secret.clone(),
                config.infra_webhook_secret.clone(),
            )));

            tracing::debug!("Webhooks plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let service = context.require_service::<WebhookService>();
        Some(PluginRoutes::new(
            handlers::configure_routes().with_state(service),
        ))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(WebhooksApiDoc::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_webhooks_plugin_requires_deployment_service() {
        let context = ServiceRegistrationContext::new();
        context.register_service(Arc::new(ServerConfig::default()));

        let result = WebhooksPlugin::new().register_services(&context).await;
        assert!(matches!(result, Err(PluginError::ServiceNotFound { .. })));
        assert_eq!(WebhooksPlugin::new().name(), "webhooks");
    }
}
