use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use stackdeploy_auth::{RateLimitPolicy, RateLimiter, RequireAuth};
use stackdeploy_core::problemdetails::Problem;
use stackdeploy_core::UtcDateTime;
use stackdeploy_entities::subscriptions;
use stackdeploy_entities::types::{SubscriptionStatus, Tier};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::SubscriptionService;

pub struct BillingState {
    pub subscription_service: Arc<SubscriptionService>,
    pub rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    /// Plan selector `<template-id>[-<tier>]`, e.g. `rag-app-pro`
    #[schema(example = "notary-assistant-basic")]
    pub plan_type: String,
    /// Payment method token from the payments provider's client SDK
    pub payment_method_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSubscriptionResponse {
    pub subscription_id: Uuid,
    pub stripe_subscription_id: String,
    /// Present when the first payment needs client-side confirmation
    pub client_secret: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_type: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub plan_type: String,
    pub template_id: String,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub stripe_subscription_id: String,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl From<subscriptions::Model> for SubscriptionResponse {
    fn from(model: subscriptions::Model) -> Self {
        Self {
            id: model.id,
            plan_type: model.plan_type,
            template_id: model.template_id,
            tier: model.tier,
            status: model.status,
            stripe_subscription_id: model.stripe_subscription_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListSubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionResponse>,
}

#[derive(OpenApi)]
#[openapi(
    paths(create_subscription, list_subscriptions),
    components(schemas(
        CreateSubscriptionRequest,
        CreateSubscriptionResponse,
        SubscriptionResponse,
        ListSubscriptionsResponse,
        SubscriptionStatus,
        Tier
    )),
    tags((name = "Subscriptions", description = "Recurring billing for template plans"))
)]
pub struct BillingApiDoc;

/// Buy a monthly subscription for a template plan
#[utoipa::path(
    post,
    path = "/create-subscription",
    tag = "Subscriptions",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = CreateSubscriptionResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 402, description = "Payment rejected by the provider"),
        (status = 404, description = "Unknown template or tier"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 503, description = "Payments provider unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_subscription(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<BillingState>>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, Problem> {
    state
        .rate_limiter
        .check(&auth.user_id, &RateLimitPolicy::CREATE_SUBSCRIPTION)?;

    let created = state
        .subscription_service
        .create_subscription(&auth, &request.plan_type, &request.payment_method_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSubscriptionResponse {
            subscription_id: created.subscription.id,
            stripe_subscription_id: created.subscription.stripe_subscription_id,
            client_secret: created.client_secret,
            status: created.subscription.status,
            plan_type: created.subscription.plan_type,
        }),
    ))
}

/// List the caller's subscriptions, newest first
#[utoipa::path(
    get,
    path = "/subscriptions",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Caller's subscriptions", body = ListSubscriptionsResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_subscriptions(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<BillingState>>,
) -> Result<impl IntoResponse, Problem> {
    state
        .rate_limiter
        .check(&auth.user_id, &RateLimitPolicy::DEFAULT)?;

    let subscriptions = state
        .subscription_service
        .list_subscriptions(&auth)
        .await?
        .into_iter()
        .map(SubscriptionResponse::from)
        .collect();

    Ok(Json(ListSubscriptionsResponse { subscriptions }))
}

pub fn configure_routes() -> Router<Arc<BillingState>> {
    Router::new()
        .route("/create-subscription", post(create_subscription))
        .route("/subscriptions", get(list_subscriptions))
}
