use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use stackdeploy_auth::{RateLimitPolicy, RateLimiter, RequireAuth};
use stackdeploy_core::problemdetails::Problem;
use stackdeploy_core::UtcDateTime;
use stackdeploy_entities::types::{DeploymentStatus, Tier, UpdateSchedule};
use stackdeploy_entities::{deployments, update_history};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::DeploymentService;

pub struct DeploymentsState {
    pub deployment_service: Arc<DeploymentService>,
    pub rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeployRequest {
    /// Template selector `<template-id>[-<tier>]`; the tier defaults to the subscription's
    #[schema(example = "notary-assistant")]
    pub template_id: String,
    pub payment_method_id: String,
    /// Active subscription paying for this deployment
    pub subscription_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeployResponse {
    pub deployment_id: Uuid,
    pub url: String,
    pub status: DeploymentStatus,
    pub subscription_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeploymentResponse {
    pub id: Uuid,
    pub template_id: String,
    pub tier: Tier,
    pub url: String,
    pub status: DeploymentStatus,
    pub droplet_id: String,
    pub subscription_id: Option<Uuid>,
    pub auto_update_enabled: bool,
    pub update_schedule: UpdateSchedule,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl From<deployments::Model> for DeploymentResponse {
    fn from(model: deployments::Model) -> Self {
        Self {
            id: model.id,
            template_id: model.template_id,
            tier: model.tier,
            url: model.url,
            status: model.status,
            droplet_id: model.droplet_id,
            subscription_id: model.subscription_id,
            auto_update_enabled: model.auto_update_enabled,
            update_schedule: model.update_schedule,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListDeploymentsResponse {
    pub deployments: Vec<DeploymentResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeardownResponse {
    pub message: String,
    pub deployment_id: Uuid,
    pub droplet_destroyed: bool,
    pub subscription_canceled: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntryResponse {
    pub id: i64,
    pub event: String,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
}

impl From<update_history::Model> for HistoryEntryResponse {
    fn from(model: update_history::Model) -> Self {
        Self {
            id: model.id,
            event: model.event,
            details: model.details,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListHistoryResponse {
    pub deployment_id: Uuid,
    pub history: Vec<HistoryEntryResponse>,
}

#[derive(OpenApi)]
#[openapi(
    paths(deploy, list_deployments, teardown_deployment, list_history),
    components(schemas(
        DeployRequest,
        DeployResponse,
        DeploymentResponse,
        ListDeploymentsResponse,
        TeardownResponse,
        HistoryEntryResponse,
        ListHistoryResponse,
        DeploymentStatus,
        UpdateSchedule
    )),
    tags((name = "Deployments", description = "Provisioned template stacks"))
)]
pub struct DeploymentsApiDoc;

/// Provision a template stack under an active subscription
#[utoipa::path(
    post,
    path = "/deploy",
    tag = "Deployments",
    request_body = DeployRequest,
    responses(
        (status = 200, description = "Droplet provisioned, stack deploying", body = DeployResponse),
        (status = 400, description = "Invalid request or subscription/template mismatch"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Unknown template or subscription"),
        (status = 409, description = "Subscription is not active"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 502, description = "Infrastructure provider refused the request"),
        (status = 503, description = "Infrastructure provider unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn deploy(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<DeploymentsState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, Problem> {
    state
        .rate_limiter
        .check(&auth.user_id, &RateLimitPolicy::DEPLOY)?;

    let deployed = state
        .deployment_service
        .deploy(
            &auth,
            &request.template_id,
            &request.payment_method_id,
            request.subscription_id,
        )
        .await?;

    Ok(Json(DeployResponse {
        deployment_id: deployed.deployment.id,
        url: deployed.deployment.url,
        status: deployed.deployment.status,
        subscription_id: deployed.subscription_id,
    }))
}

/// List the caller's deployments, newest first
#[utoipa::path(
    get,
    path = "/deployments",
    tag = "Deployments",
    responses(
        (status = 200, description = "Caller's deployments", body = ListDeploymentsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_deployments(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<DeploymentsState>>,
) -> Result<impl IntoResponse, Problem> {
    state
        .rate_limiter
        .check(&auth.user_id, &RateLimitPolicy::DEFAULT)?;

    let deployments = state
        .deployment_service
        .list_deployments(&auth)
        .await?
        .into_iter()
        .map(DeploymentResponse::from)
        .collect();

    Ok(Json(ListDeploymentsResponse { deployments }))
}

/// Destroy a deployment's droplet and cancel its subscription
#[utoipa::path(
    delete,
    path = "/deployments/{deployment_id}",
    tag = "Deployments",
    params(("deployment_id" = Uuid, Path, description = "Deployment ID")),
    responses(
        (status = 200, description = "Deployment deleted", body = TeardownResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Deployment not found"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 503, description = "Provider unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn teardown_deployment(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<DeploymentsState>>,
    Path(deployment_id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    state
        .rate_limiter
        .check(&auth.user_id, &RateLimitPolicy::TEARDOWN)?;

    let summary = state
        .deployment_service
        .teardown(&auth, deployment_id)
        .await?;

    Ok(Json(TeardownResponse {
        message: "Deployment deleted successfully".to_string(),
        deployment_id: summary.deployment_id,
        droplet_destroyed: summary.droplet_destroyed,
        subscription_canceled: summary.subscription_canceled,
    }))
}

/// Status and subscription events recorded for a deployment, newest first
#[utoipa::path(
    get,
    path = "/deployments/{deployment_id}/history",
    tag = "Deployments",
    params(("deployment_id" = Uuid, Path, description = "Deployment ID")),
    responses(
        (status = 200, description = "Update history", body = ListHistoryResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Deployment not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_history(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<DeploymentsState>>,
    Path(deployment_id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    state
        .rate_limiter
        .check(&auth.user_id, &RateLimitPolicy::DEFAULT)?;

    let history = state
        .deployment_service
        .list_history(&auth, deployment_id)
        .await?
        .into_iter()
        .map(HistoryEntryResponse::from)
        .collect();

    Ok(Json(ListHistoryResponse {
        deployment_id,
        history,
    }))
}

pub fn configure_routes() -> Router<Arc<DeploymentsState>> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/deployments", get(list_deployments))
        .route("/deployments/{deployment_id}", delete(teardown_deployment))
        .route("/deployments/{deployment_id}/history", get(list_history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeInfrastructure;
    use crate::ProvisionSettings;
    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use stackdeploy_auth::AuthContext;
    use stackdeploy_billing::test_utils::FakePayments;
    use stackdeploy_billing::SubscriptionService;
    use stackdeploy_catalog::TemplateCatalog;
    use stackdeploy_config::DropletDefaults;
    use stackdeploy_database::test_utils::TestDatabase;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        _test_db: TestDatabase,
        subscriptions: Arc<SubscriptionService>,
        state: Arc<DeploymentsState>,
        infrastructure: Arc<FakeInfrastructure>,
    }

    async fn test_app() -> anyhow::Result<TestApp> {
        let test_db = TestDatabase::new().await?;
        let catalog = Arc::new(TemplateCatalog::bundled()?);
        let infrastructure = Arc::new(FakeInfrastructure::new());
        let subscriptions = Arc::new(SubscriptionService::new(
            test_db.db.clone(),
            catalog.clone(),
            Arc::new(FakePayments::new()),
        ));
        let deployment_service = Arc::new(DeploymentService::new(
            test_db.db.clone(),
            catalog,
            infrastructure.clone(),
            subscriptions.clone(),
            ProvisionSettings {
                droplet: DropletDefaults::default(),
                wait_attempts: 2,
                wait_interval: Duration::ZERO,
            },
        ));
        Ok(TestApp {
            _test_db: test_db,
            subscriptions,
            state: Arc::new(DeploymentsState {
                deployment_service,
                rate_limiter: Arc::new(RateLimiter::new()),
            }),
            infrastructure,
        })
    }

    fn router(app: &TestApp, caller: &AuthContext) -> Router {
        configure_routes()
            .with_state(app.state.clone())
            .layer(axum::Extension(caller.clone()))
    }

    fn deploy_request(template_id: &str, subscription_id: Uuid) -> axum::http::Request<Body> {
        let body = serde_json::json!({
            "template_id": template_id,
            "payment_method_id": "pm_card_visa",
            "subscription_id": subscription_id,
        });
        axum::http::Request::builder()
            .method("POST")
            .uri("/deploy")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_deploy_then_list() -> anyhow::Result<()> {
        let app = test_app().await?;
        let caller = AuthContext::new("user-1", "a@example.com");
        let subscription = app
            .subscriptions
            .create_subscription(&caller, "notary-assistant-basic", "pm_card_visa")
            .await?
            .subscription;

        let response = router(&app, &caller)
            .oneshot(deploy_request("notary-assistant", subscription.id))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "deploying");
        assert!(!body["url"].as_str().unwrap_or_default().is_empty());
        assert_eq!(body["subscription_id"], subscription.id.to_string());

        let response = router(&app, &caller)
            .oneshot(empty_request("GET", "/deployments"))
            .await?;
        let body = json_body(response).await;
        let deployments = body["deployments"].as_array().unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0]["template_id"], "notary-assistant");
        assert_eq!(deployments[0]["status"], "deploying");
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_rejection_is_bad_gateway() -> anyhow::Result<()> {
        let app = test_app().await?;
        let caller = AuthContext::new("user-1", "a@example.com");
        let subscription = app
            .subscriptions
            .create_subscription(&caller, "rag-app", "pm_card_visa")
            .await?
            .subscription;
        app.infrastructure.reject_next("droplet limit reached");

        let response = router(&app, &caller)
            .oneshot(deploy_request("rag-app", subscription.id))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = router(&app, &caller)
            .oneshot(empty_request("GET", "/deployments"))
            .await?;
        let body = json_body(response).await;
        assert!(body["deployments"].as_array().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_inactive_subscription_is_conflict() -> anyhow::Result<()> {
        let app = test_app().await?;
        let caller = AuthContext::new("user-1", "a@example.com");
        let subscription = app
            .subscriptions
            .create_subscription(&caller, "rag-app", "pm_card_visa")
            .await?
            .subscription;
        app.subscriptions
            .cancel_subscription(&caller, subscription.id)
            .await?;

        let response = router(&app, &caller)
            .oneshot(deploy_request("rag-app", subscription.id))
            .await?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn test_teardown_and_history_are_owner_scoped() -> anyhow::Result<()> {
        let app = test_app().await?;
        let owner = AuthContext::new("owner", "owner@example.com");
        let stranger = AuthContext::new("stranger", "stranger@example.com");
        let subscription = app
            .subscriptions
            .create_subscription(&owner, "ai-agent", "pm_card_visa")
            .await?
            .subscription;

        let response = router(&app, &owner)
            .oneshot(deploy_request("ai-agent", subscription.id))
            .await?;
        let deployment_id = json_body(response).await["deployment_id"]
            .as_str()
            .unwrap()
            .to_string();

        let history_uri = format!("/deployments/{}/history", deployment_id);
        let response = router(&app, &stranger)
            .oneshot(empty_request("GET", &history_uri))
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(&app, &owner)
            .oneshot(empty_request("GET", &history_uri))
            .await?;
        let body = json_body(response).await;
        assert_eq!(body["history"][0]["event"], "created");

        let teardown_uri = format!("/deployments/{}", deployment_id);
        let response = router(&app, &stranger)
            .oneshot(empty_request("DELETE", &teardown_uri))
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(&app, &owner)
            .oneshot(empty_request("DELETE", &teardown_uri))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Deployment deleted successfully");
        assert_eq!(body["subscription_canceled"], true);
        Ok(())
    }

    #[tokio::test]
    async fn test_deploy_without_token_is_unauthorized() -> anyhow::Result<()> {
        let app = test_app().await?;
        let response = configure_routes()
            .with_state(app.state.clone())
            .oneshot(deploy_request("rag-app", Uuid::new_v4()))
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
