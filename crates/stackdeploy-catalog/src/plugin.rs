use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stackdeploy_core::plugin::{
    PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext, StackPlugin,
};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{self, CatalogApiDoc};
use crate::TemplateCatalog;

/// Registers the bundled [`TemplateCatalog`] and serves `GET /templates`.
#[derive(Default)]
pub struct CatalogPlugin;

impl CatalogPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl StackPlugin for CatalogPlugin {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let catalog = TemplateCatalog::bundled()
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            tracing::info!(
                "Template catalog ready: {}",
                catalog.template_ids().collect::<Vec<_>>().join(", ")
            );
            context.register_service(Arc::new(catalog));
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let catalog = context.require_service::<TemplateCatalog>();
        Some(PluginRoutes::new(
            handlers::configure_routes().with_state(catalog),
        ))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(CatalogApiDoc::openapi())
    }
}
