use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use sea_orm::DatabaseConnection;
use stackdeploy_auth::AuthPlugin;
use stackdeploy_billing::BillingPlugin;
use stackdeploy_catalog::CatalogPlugin;
use stackdeploy_config::{ConfigPlugin, ServerConfig};
use stackdeploy_core::plugin::{middleware_helpers::PROCESS_TIME_HEADER, PluginManager};
use stackdeploy_deployments::{DeploymentsPlugin, StatusPoller};
use stackdeploy_webhooks::WebhooksPlugin;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa_swagger_ui::SwaggerUi;

use super::shutdown::shutdown_signal;

/// The assembled HTTP app and the background poller it expects to be running
pub struct ApiApplication {
    pub router: Router,
    pub poller: Arc<StatusPoller>,
}

fn create_swagger_router(plugin_manager: &PluginManager) -> anyhow::Result<Router> {
    let api_doc = plugin_manager
        .get_unified_openapi()
        .map_err(|e| anyhow::anyhow!("Failed to build OpenAPI document: {}", e))?;
    Ok(Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc)))
}

fn create_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(&origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    debug!("CORS allows {} origin(s)", origins.len());

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(PROCESS_TIME_HEADER)])
        .allow_credentials(true)
}

/// Register every plugin against `db` and build the router
pub async fn build_api(
    config: Arc<ServerConfig>,
    db: Arc<DatabaseConnection>,
) -> anyhow::Result<ApiApplication> {
    let mut plugin_manager = PluginManager::new();
    plugin_manager.service_context().register_service(db);

    plugin_manager.register_plugin(Box::new(ConfigPlugin::new(config.clone())));
    plugin_manager.register_plugin(Box::new(CatalogPlugin::new()));
    plugin_manager.register_plugin(Box::new(AuthPlugin::new()));
    plugin_manager.register_plugin(Box::new(BillingPlugin::new()));
    plugin_manager.register_plugin(Box::new(DeploymentsPlugin::new()));
    plugin_manager.register_plugin(Box::new(WebhooksPlugin::new()));

    if let Err(e) = plugin_manager.initialize_plugins().await {
        tracing::error!("Plugin initialization failed: {}", e);
        return Err(anyhow::anyhow!("Plugin initialization failed: {}", e));
    }
    debug!("All plugins initialized successfully");

    let poller = plugin_manager
        .service_context()
        .require_service::<StatusPoller>()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut router = plugin_manager
        .build_application()
        .map_err(|e| anyhow::anyhow!("Failed to build application: {}", e))?;
    if config.is_production() {
        debug!("API docs disabled in production");
    } else {
        router = router.merge(create_swagger_router(&plugin_manager)?);
    }

    let router = router
        .layer(create_cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    Ok(ApiApplication { router, poller })
}

/// Connect, migrate, start the poller and serve until a shutdown signal
pub async fn start_api(config: Arc<ServerConfig>) -> anyhow::Result<()> {
    debug!("Initializing database connection...");
    let db = stackdeploy_database::establish_connection(
        &config.database_url,
        config.database_max_connections,
    )
    .await?;

    let ApiApplication { router, poller } = build_api(config.clone(), db).await?;

    let cancellation_token = CancellationToken::new();
    let poller_token = cancellation_token.clone();
    let poller_handle = tokio::spawn(async move {
        poller.run(poller_token).await;
    });

    let listener = TcpListener::bind(&config.address).await?;
    info!("API server listening on {}", config.address);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancellation_token.clone()))
        .await?;

    cancellation_token.cancel();
    if let Err(e) = poller_handle.await {
        warn!("Status poller did not stop cleanly: {}", e);
    }
    info!("API server exited");
    Ok(())
}
