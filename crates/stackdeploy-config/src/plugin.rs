//! Config plugin: exposes `ConfigService` to the other plugins and serves the
//! public service-info and health endpoints.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stackdeploy_core::plugin::middleware_helpers::process_time_middleware;
use stackdeploy_core::plugin::{
    PluginContext, PluginError, PluginMiddlewareCollection, PluginRoutes,
    ServiceRegistrationContext, StackPlugin,
};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::{configure_routes, ConfigService, ServerConfig, SystemApiDoc};

pub struct ConfigPlugin {
    server_config: Arc<ServerConfig>,
}

impl ConfigPlugin {
    pub fn new(server_config: Arc<ServerConfig>) -> Self {
        Self { server_config }
    }
}

impl StackPlugin for ConfigPlugin {
    fn name(&self) -> &'static str {
        "config"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            self.server_config
                .validate()
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

            context.register_service(self.server_config.clone());
            context.register_service(Arc::new(ConfigService::new(self.server_config.clone())));

            tracing::debug!("Config plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let config_service = context.require_service::<ConfigService>();
        Some(PluginRoutes::new(
            configure_routes().with_state(config_service),
        ))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(SystemApiDoc::openapi())
    }

    fn configure_middleware(&self, _context: &PluginContext) -> Option<PluginMiddlewareCollection> {
        let mut collection = PluginMiddlewareCollection::new();
        collection.add_observability_middleware(
            "process_time",
            "config",
            process_time_middleware("config"),
        );
        Some(collection)
    }
}
