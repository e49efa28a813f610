use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use stackdeploy_auth::RateLimiter;
use stackdeploy_billing::SubscriptionService;
use stackdeploy_catalog::TemplateCatalog;
use stackdeploy_config::ServerConfig;
use stackdeploy_core::plugin::{
    PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext, StackPlugin,
};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{self, DeploymentsApiDoc, DeploymentsState};
use crate::{
    DeploymentService, DigitalOceanClient, InfrastructureProvider, ProvisionSettings,
    StatusPoller,
};

/// Wires the DigitalOcean client, the orchestrator and the status poller.
///
/// The poller is registered but not started; the server spawns it.
#[derive(Default)]
pub struct DeploymentsPlugin;

impl DeploymentsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl StackPlugin for DeploymentsPlugin {
    fn name(&self) -> &'static str {
        "deployments"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let config = context.require_service::<ServerConfig>()?;
            let catalog = context.require_service::<TemplateCatalog>()?;
            let subscriptions = context.require_service::<SubscriptionService>()?;
            let rate_limiter = context.require_service::<RateLimiter>()?;

            let client = DigitalOceanClient::with_base_url(
                &config.digitalocean_token,
                &config.digitalocean_api_base,
            )
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            let infrastructure: Arc<dyn InfrastructureProvider> = Arc::new(client);

            let deployment_service = Arc::new(DeploymentService::new(
                db,
                catalog,
                infrastructure.clone(),
                subscriptions,
                ProvisionSettings::from_config(&config),
            ));
            let poller = Arc::new(StatusPoller::new(
                deployment_service.clone(),
                config.status_poll_interval(),
            ));

            context.register_service(infrastructure);
            context.register_service(deployment_service.clone());
            context.register_service(poller);
            context.register_service(Arc::new(DeploymentsState {
                deployment_service,
                rate_limiter,
            }));

            tracing::debug!("Deployments plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<DeploymentsState>();
        Some(PluginRoutes::new(
            handlers::configure_routes().with_state(state),
        ))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(DeploymentsApiDoc::openapi())
    }
}
