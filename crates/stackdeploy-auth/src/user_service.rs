use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use stackdeploy_core::UtcDateTime;
use stackdeploy_database::begin_owner_scope;
use stackdeploy_entities::types::SubscriptionStatus;
use stackdeploy_entities::{deployments, subscriptions, update_history, user_profiles};
use tracing::info;
use utoipa::ToSchema;

use crate::{AuthContext, AuthError};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileSummary {
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    /// Subscriptions currently in `active` status
    pub subscription_count: u64,
    pub deployment_count: u64,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DataErasureSummary {
    pub user_id: String,
    pub subscriptions_deleted: u64,
}

/// Insert the caller's profile row if missing and keep its email in step with
/// the identity provider.
pub async fn ensure_profile_in<C: ConnectionTrait>(
    conn: &C,
    auth: &AuthContext,
) -> Result<user_profiles::Model, AuthError> {
    if let Some(existing) = user_profiles::Entity::find_by_id(auth.user_id.clone())
        .one(conn)
        .await?
    {
        if auth.email.is_empty() || existing.email == auth.email {
            return Ok(existing);
        }
        let mut active: user_profiles::ActiveModel = existing.into();
        active.email = Set(auth.email.clone());
        return Ok(active.update(conn).await?);
    }

    let full_name = auth
        .email
        .split('@')
        .next()
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let profile = user_profiles::ActiveModel {
        id: Set(auth.user_id.clone()),
        email: Set(auth.email.clone()),
        full_name: Set(full_name),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    info!("Created profile for user {}", auth.user_id);
    Ok(profile)
}

pub struct UserProfileService {
    db: Arc<DatabaseConnection>,
}

impl UserProfileService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn ensure_profile(&self, auth: &AuthContext) -> Result<user_profiles::Model, AuthError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let profile = ensure_profile_in(&txn, auth).await?;
        txn.commit().await?;
        Ok(profile)
    }

    /// Profile plus active-subscription and deployment counts
    pub async fn get_profile(&self, auth: &AuthContext) -> Result<ProfileSummary, AuthError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let profile = ensure_profile_in(&txn, auth).await?;

        let subscription_count = subscriptions::Entity::find()
            .filter(subscriptions::Column::UserId.eq(auth.user_id.as_str()))
            .filter(subscriptions::Column::Status.eq(SubscriptionStatus::Active))
            .count(&txn)
            .await?;
        let deployment_count = deployments::Entity::find()
            .filter(deployments::Column::UserId.eq(auth.user_id.as_str()))
            .count(&txn)
            .await?;
        txn.commit().await?;

        Ok(ProfileSummary {
            user_id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            subscription_count,
            deployment_count,
            created_at: profile.created_at,
        })
    }

    pub async fn update_full_name(
        &self,
        auth: &AuthContext,
        full_name: Option<String>,
    ) -> Result<user_profiles::Model, AuthError> {
        let full_name = full_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if full_name.as_ref().is_some_and(|n| n.chars().count() > 200) {
            return Err(AuthError::Validation(
                "full_name must be at most 200 characters".to_string(),
            ));
        }

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let profile = ensure_profile_in(&txn, auth).await?;
        let mut active: user_profiles::ActiveModel = profile.into();
        active.full_name = Set(full_name);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Ok(updated)
    }

    /// Remove the caller's profile and every row they own.
    ///
    /// Refused while the caller still has deployments or subscriptions the
    /// provider may bill for; those must be torn down first.
    pub async fn delete_user_data(
        &self,
        auth: &AuthContext,
    ) -> Result<DataErasureSummary, AuthError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;

        let deployment_count = deployments::Entity::find()
            .filter(deployments::Column::UserId.eq(auth.user_id.as_str()))
            .count(&txn)
            .await?;
        if deployment_count > 0 {
            return Err(AuthError::Conflict(format!(
                "{} deployment(s) must be deleted before erasing account data",
                deployment_count
            )));
        }

        let owned = subscriptions::Entity::find()
            .filter(subscriptions::Column::UserId.eq(auth.user_id.as_str()))
            .all(&txn)
            .await?;
        if owned.iter().any(|s| s.status.is_billable()) {
            return Err(AuthError::Conflict(
                "Billable subscriptions must be canceled before erasing account data".to_string(),
            ));
        }

        update_history::Entity::delete_many()
            .filter(update_history::Column::UserId.eq(auth.user_id.as_str()))
            .exec(&txn)
            .await?;
        let removed = subscriptions::Entity::delete_many()
            .filter(subscriptions::Column::UserId.eq(auth.user_id.as_str()))
            .exec(&txn)
            .await?;
        user_profiles::Entity::delete_by_id(auth.user_id.clone())
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(
            "Erased data for user {} ({} subscriptions)",
            auth.user_id, removed.rows_affected
        );
        Ok(DataErasureSummary {
            user_id: auth.user_id.clone(),
            subscriptions_deleted: removed.rows_affected,
        })
    }
}
