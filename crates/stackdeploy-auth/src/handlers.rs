use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use stackdeploy_core::problemdetails::Problem;
use stackdeploy_core::UtcDateTime;
use utoipa::{OpenApi, ToSchema};

use crate::{
    DataErasureSummary, ProfileSummary, RateLimitPolicy, RateLimiter, RequireAuth,
    UserProfileService,
};

pub struct AuthState {
    pub user_service: Arc<UserProfileService>,
    pub rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

#[derive(OpenApi)]
#[openapi(
    paths(get_profile, update_profile, delete_user_data),
    components(schemas(
        ProfileSummary,
        ProfileResponse,
        UpdateProfileRequest,
        DataErasureSummary
    )),
    tags((name = "Users", description = "Caller profile and account data"))
)]
pub struct UserApiDoc;

#[utoipa::path(
    get,
    path = "/user/profile",
    tag = "Users",
    responses(
        (status = 200, description = "Profile with subscription and deployment counts", body = ProfileSummary),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 429, description = "Rate limit exceeded")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_profile(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<AuthState>>,
) -> Result<impl IntoResponse, Problem> {
    state.rate_limiter.check(&auth.user_id, &RateLimitPolicy::DEFAULT)?;
    let summary = state.user_service.get_profile(&auth).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    put,
    path = "/user/profile",
    tag = "Users",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Invalid profile data"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_profile(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<AuthState>>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, Problem> {
    state.rate_limiter.check(&auth.user_id, &RateLimitPolicy::DEFAULT)?;
    let profile = state
        .user_service
        .update_full_name(&auth, request.full_name)
        .await?;

    Ok(Json(ProfileResponse {
        user_id: profile.id,
        email: profile.email,
        full_name: profile.full_name,
        updated_at: profile.updated_at,
    }))
}

#[utoipa::path(
    delete,
    path = "/user/data",
    tag = "Users",
    responses(
        (status = 200, description = "Account data erased", body = DataErasureSummary),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 409, description = "Deployments or billable subscriptions remain")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user_data(
    RequireAuth(auth): RequireAuth,
    State(state): State<Arc<AuthState>>,
) -> Result<impl IntoResponse, Problem> {
    state.rate_limiter.check(&auth.user_id, &RateLimitPolicy::DEFAULT)?;
    let summary = state.user_service.delete_user_data(&auth).await?;
    Ok(Json(summary))
}

pub fn configure_routes() -> Router<Arc<AuthState>> {
    Router::new()
        .route("/user/profile", get(get_profile).put(update_profile))
        .route("/user/data", delete(delete_user_data))
}
