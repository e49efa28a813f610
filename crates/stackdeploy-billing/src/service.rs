use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use stackdeploy_auth::{ensure_profile_in, AuthContext};
use stackdeploy_catalog::TemplateCatalog;
use stackdeploy_database::{begin_owner_scope, begin_system_scope};
use stackdeploy_entities::subscriptions;
use stackdeploy_entities::types::SubscriptionStatus;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::provider::{NewCustomer, NewSubscription, PaymentsError, PaymentsProvider};
use crate::SubscriptionError;

/// Result of a successful subscription purchase
#[derive(Debug, Clone)]
pub struct CreatedSubscription {
    pub subscription: subscriptions::Model,
    pub client_secret: Option<String>,
}

/// Look up a subscription only if `user_id` owns it
pub async fn find_owned_subscription<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    subscription_id: Uuid,
) -> Result<Option<subscriptions::Model>, DbErr> {
    subscriptions::Entity::find_by_id(subscription_id)
        .filter(subscriptions::Column::UserId.eq(user_id))
        .one(conn)
        .await
}

fn parse_status(status: &str) -> SubscriptionStatus {
    SubscriptionStatus::from_str(status).unwrap_or_else(|| {
        warn!("Unknown subscription status '{}', storing as incomplete", status);
        SubscriptionStatus::Incomplete
    })
}

pub struct SubscriptionService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<TemplateCatalog>,
    payments: Arc<dyn PaymentsProvider>,
}

impl SubscriptionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<TemplateCatalog>,
        payments: Arc<dyn PaymentsProvider>,
    ) -> Self {
        Self {
            db,
            catalog,
            payments,
        }
    }

    /// Buy a monthly subscription for `plan_type` on behalf of `auth`.
    ///
    /// The local row is written only after the provider accepted both the
    /// customer and the subscription.
    pub async fn create_subscription(
        &self,
        auth: &AuthContext,
        plan_type: &str,
        payment_method_id: &str,
    ) -> Result<CreatedSubscription, SubscriptionError> {
        let payment_method_id = payment_method_id.trim();
        if payment_method_id.is_empty() {
            return Err(SubscriptionError::Validation(
                "payment_method_id is required".to_string(),
            ));
        }
        if auth.email.is_empty() {
            return Err(SubscriptionError::Validation(
                "An email address is required to subscribe".to_string(),
            ));
        }

        let plan = self.catalog.resolve_plan(plan_type)?;

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        ensure_profile_in(&txn, auth).await?;
        txn.commit().await?;

        let customer = self
            .payments
            .create_customer(&NewCustomer {
                user_id: auth.user_id.clone(),
                email: auth.email.clone(),
                payment_method_id: payment_method_id.to_string(),
            })
            .await?;

        let remote = self
            .payments
            .create_subscription(&NewSubscription {
                customer_id: customer.id.clone(),
                user_id: auth.user_id.clone(),
                plan_type: plan.plan_type(),
                template_id: plan.template_id.clone(),
                product_name: plan.product_name(),
                unit_amount: plan.unit_amount,
            })
            .await?;

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let subscription = subscriptions::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(auth.user_id.clone()),
            user_email: Set(auth.email.clone()),
            stripe_customer_id: Set(customer.id),
            stripe_subscription_id: Set(remote.id.clone()),
            plan_type: Set(plan.plan_type()),
            template_id: Set(plan.template_id.clone()),
            tier: Set(plan.tier),
            status: Set(parse_status(&remote.status)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(
            "User {} subscribed to {} ({}), status {}",
            auth.user_id,
            subscription.plan_type,
            subscription.stripe_subscription_id,
            subscription.status
        );

        Ok(CreatedSubscription {
            subscription,
            client_secret: remote.client_secret,
        })
    }

    /// The caller's subscriptions, newest first
    pub async fn list_subscriptions(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<subscriptions::Model>, SubscriptionError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let rows = subscriptions::Entity::find()
            .filter(subscriptions::Column::UserId.eq(auth.user_id.as_str()))
            .order_by_desc(subscriptions::Column::CreatedAt)
            .all(&txn)
            .await?;
        txn.commit().await?;
        Ok(rows)
    }

    pub async fn get_subscription(
        &self,
        auth: &AuthContext,
        subscription_id: Uuid,
    ) -> Result<subscriptions::Model, SubscriptionError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let found = find_owned_subscription(&txn, &auth.user_id, subscription_id).await?;
        txn.commit().await?;
        found.ok_or_else(|| SubscriptionError::NotFound(subscription_id.to_string()))
    }

    /// Cancel at the provider and mark the local row `canceled`.
    ///
    /// A subscription the provider no longer knows is treated as canceled.
    pub async fn cancel_subscription(
        &self,
        auth: &AuthContext,
        subscription_id: Uuid,
    ) -> Result<subscriptions::Model, SubscriptionError> {
        let subscription = self.get_subscription(auth, subscription_id).await?;
        if subscription.status == SubscriptionStatus::Canceled {
            return Ok(subscription);
        }

        match self
            .payments
            .cancel_subscription(&subscription.stripe_subscription_id)
            .await
        {
            Ok(_) => {}
            Err(PaymentsError::NotFound(message)) => {
                warn!(
                    "Subscription {} already gone at provider: {}",
                    subscription.stripe_subscription_id, message
                );
            }
            Err(e) => return Err(e.into()),
        }

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let mut active: subscriptions::ActiveModel = subscription.into();
        active.status = Set(SubscriptionStatus::Canceled);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!("Canceled subscription {} for user {}", updated.id, auth.user_id);
        Ok(updated)
    }

    /// Record a status reported by the provider (webhooks).
    ///
    /// Returns the subscription with its previous status, or `None` when the
    /// provider id is unknown locally. A canceled subscription stays canceled.
    pub async fn apply_provider_status(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<Option<(subscriptions::Model, SubscriptionStatus)>, SubscriptionError> {
        let txn = begin_system_scope(&self.db).await?;
        let Some(existing) = subscriptions::Entity::find()
            .filter(subscriptions::Column::StripeSubscriptionId.eq(stripe_subscription_id))
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            return Ok(None);
        };

        let previous = existing.status;
        if previous == SubscriptionStatus::Canceled && status != SubscriptionStatus::Canceled {
            txn.commit().await?;
            debug!(
                "Ignoring status {} for canceled subscription {}",
                status, stripe_subscription_id
            );
            return Ok(Some((existing, previous)));
        }

        let updated = if previous == status {
            existing
        } else {
            let mut active: subscriptions::ActiveModel = existing.into();
            active.status = Set(status);
            active.update(&txn).await?
        };
        txn.commit().await?;

        if previous != status {
            info!(
                "Subscription {} moved from {} to {}",
                stripe_subscription_id, previous, status
            );
        }
        Ok(Some((updated, previous)))
    }
}
