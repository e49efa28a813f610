use crate::ConfigService;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use stackdeploy_core::UtcDateTime;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub status: String,
    pub docs: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: UtcDateTime,
    pub version: String,
    pub environment: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(root, health_check),
    components(schemas(RootResponse, HealthResponse)),
    tags((name = "System", description = "Service information and health"))
)]
pub struct SystemApiDoc;

/// API information
#[utoipa::path(
    tag = "System",
    get,
    path = "/",
    responses((status = 200, description = "Service information", body = RootResponse))
)]
pub async fn root(State(config_service): State<Arc<ConfigService>>) -> impl IntoResponse {
    let docs = if config_service.is_production() {
        "Contact support for API docs"
    } else {
        "/swagger-ui"
    };

    Json(RootResponse {
        message: "AI-Stack Deploy API".to_string(),
        version: stackdeploy_core::API_VERSION.to_string(),
        status: "operational".to_string(),
        docs: docs.to_string(),
    })
}

/// Liveness probe for monitoring
#[utoipa::path(
    tag = "System",
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(config_service): State<Arc<ConfigService>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: stackdeploy_core::API_VERSION.to_string(),
        environment: config_service.environment().to_string(),
    })
}

pub fn configure_routes() -> Router<Arc<ConfigService>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(environment: &str) -> Router {
        let config = ServerConfig {
            environment: environment.to_string(),
            ..Default::default()
        };
        configure_routes().with_state(Arc::new(ConfigService::new(Arc::new(config))))
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_environment() {
        let body = get_json(app("staging"), "/health").await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], "1.0.0");
        assert_eq!(body["environment"], "staging");
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_root_hides_docs_in_production() {
        let body = get_json(app("production"), "/").await;
        assert_eq!(body["message"], "AI-Stack Deploy API");
        assert_eq!(body["docs"], "Contact support for API docs");

        let body = get_json(app("development"), "/").await;
        assert_eq!(body["docs"], "/swagger-ui");
    }
}
