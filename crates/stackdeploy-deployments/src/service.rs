use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde_json::json;
use stackdeploy_auth::{ensure_profile_in, AuthContext};
use stackdeploy_billing::{find_owned_subscription, SubscriptionError, SubscriptionService};
use stackdeploy_catalog::{render_cloud_init, CatalogError, TemplateCatalog};
use stackdeploy_config::{DropletDefaults, ServerConfig};
use stackdeploy_database::{begin_owner_scope, begin_system_scope};
use stackdeploy_entities::types::{DeploymentStatus, SubscriptionStatus};
use stackdeploy_entities::{deployments, update_history};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::provider::{Droplet, InfrastructureError, InfrastructureProvider, NewDroplet};
use crate::DeploymentError;

/// Droplet shape and how long to wait for its address
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub droplet: DropletDefaults,
    pub wait_attempts: u32,
    pub wait_interval: Duration,
}

impl ProvisionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            droplet: config.droplet.clone(),
            wait_attempts: config.provision_wait_attempts.max(1),
            wait_interval: config.provision_wait_interval(),
        }
    }
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone)]
pub struct DeployedStack {
    pub deployment: deployments::Model,
    pub subscription_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        deployment: deployments::Model,
        previous: DeploymentStatus,
    },
    /// The deployment already had the requested status
    Unchanged(deployments::Model),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeardownSummary {
    pub deployment_id: Uuid,
    pub droplet_destroyed: bool,
    pub subscription_canceled: bool,
}

pub struct DeploymentService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<TemplateCatalog>,
    infrastructure: Arc<dyn InfrastructureProvider>,
    subscriptions: Arc<SubscriptionService>,
    settings: ProvisionSettings,
}

impl DeploymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<TemplateCatalog>,
        infrastructure: Arc<dyn InfrastructureProvider>,
        subscriptions: Arc<SubscriptionService>,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            db,
            catalog,
            infrastructure,
            subscriptions,
            settings,
        }
    }

    /// Provision a droplet for `template_selector` under an active subscription.
    ///
    /// The deployment row is written only once the droplet exists and has a
    /// public address. A droplet left over by a later failure is destroyed
    /// best effort.
    pub async fn deploy(
        &self,
        auth: &AuthContext,
        template_selector: &str,
        payment_method_id: &str,
        subscription_id: Uuid,
    ) -> Result<DeployedStack, DeploymentError> {
        if payment_method_id.trim().is_empty() {
            return Err(DeploymentError::Validation(
                "payment_method_id is required".to_string(),
            ));
        }

        let plan = self.catalog.resolve_plan(template_selector)?;

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let subscription = find_owned_subscription(&txn, &auth.user_id, subscription_id).await?;
        txn.commit().await?;
        let subscription = subscription
            .ok_or_else(|| SubscriptionError::NotFound(subscription_id.to_string()))?;

        if subscription.status != SubscriptionStatus::Active {
            return Err(DeploymentError::SubscriptionInactive {
                subscription_id: subscription_id.to_string(),
                status: subscription.status,
            });
        }
        if subscription.template_id != plan.template_id {
            return Err(DeploymentError::Validation(format!(
                "Subscription {} is for template '{}', not '{}'",
                subscription_id, subscription.template_id, plan.template_id
            )));
        }
        if plan.tier_explicit && plan.tier != subscription.tier {
            return Err(DeploymentError::Validation(format!(
                "Subscription {} is for the {} tier, not {}",
                subscription_id, subscription.tier, plan.tier
            )));
        }
        let tier = subscription.tier;

        let template = self
            .catalog
            .get(&plan.template_id)
            .ok_or_else(|| CatalogError::TemplateNotFound(plan.template_id.clone()))?;

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        ensure_profile_in(&txn, auth).await?;
        txn.commit().await?;

        let deployment_id = Uuid::new_v4();
        let request = NewDroplet {
            name: droplet_name(deployment_id),
            region: self.settings.droplet.region.clone(),
            size: self.settings.droplet.size.clone(),
            image: self.settings.droplet.image.clone(),
            ipv6: true,
            user_data: render_cloud_init(template),
            tags: vec![
                format!("ai-deploy-{}", plan.template_id),
                format!("user-{}", auth.user_id),
                format!("tier-{}", tier),
            ],
        };

        let droplet = self.infrastructure.create_droplet(&request).await?;
        info!(
            "Droplet {} requested for deployment {} ({} {})",
            droplet.id, deployment_id, plan.template_id, tier
        );

        let address = match self.wait_for_address(&droplet).await {
            Ok(address) => address,
            Err(e) => {
                self.discard_droplet(&droplet.id).await;
                return Err(e);
            }
        };
        let url = format!("http://{}:{}", address, template.port);

        let inserted = async {
            let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
            let deployment = deployments::ActiveModel {
                id: Set(deployment_id),
                user_id: Set(auth.user_id.clone()),
                user_email: Set(auth.email.clone()),
                template_id: Set(plan.template_id.clone()),
                tier: Set(tier),
                droplet_id: Set(droplet.id.clone()),
                url: Set(url.clone()),
                status: Set(DeploymentStatus::Deploying),
                subscription_id: Set(Some(subscription.id)),
                auto_update_enabled: Set(tier.auto_update_enabled()),
                update_schedule: Set(tier.update_schedule()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            append_history(
                &txn,
                &deployment,
                "created",
                json!({
                    "droplet_id": droplet.id,
                    "url": url,
                    "template_id": plan.template_id,
                    "tier": tier,
                    "subscription_id": subscription.id,
                }),
            )
            .await?;
            txn.commit().await?;
            Ok::<_, DeploymentError>(deployment)
        }
        .await;

        let deployment = match inserted {
            Ok(deployment) => deployment,
            Err(e) => {
                error!(
                    "Failed to record deployment {} for droplet {}: {}",
                    deployment_id, droplet.id, e
                );
                self.discard_droplet(&droplet.id).await;
                return Err(e);
            }
        };

        info!(
            "Deployment {} for user {} is deploying at {}",
            deployment.id, auth.user_id, deployment.url
        );
        Ok(DeployedStack {
            deployment,
            subscription_id: subscription.id,
        })
    }

    async fn wait_for_address(&self, droplet: &Droplet) -> Result<String, DeploymentError> {
        if let Some(address) = &droplet.public_ipv4 {
            return Ok(address.clone());
        }

        for attempt in 1..=self.settings.wait_attempts {
            tokio::time::sleep(self.settings.wait_interval).await;
            let current = self.infrastructure.get_droplet(&droplet.id).await?;
            if let Some(address) = current.public_ipv4 {
                debug!(
                    "Droplet {} has address {} after {} attempt(s)",
                    droplet.id, address, attempt
                );
                return Ok(address);
            }
            if current.status == "archive" {
                return Err(InfrastructureError::Rejected(format!(
                    "Droplet {} was archived before it received an address",
                    droplet.id
                ))
                .into());
            }
        }

        Err(InfrastructureError::Rejected(format!(
            "Droplet {} had no public address after {} checks",
            droplet.id, self.settings.wait_attempts
        ))
        .into())
    }

    async fn discard_droplet(&self, droplet_id: &str) {
        match self.infrastructure.destroy_droplet(droplet_id).await {
            Ok(()) => info!("Destroyed orphaned droplet {}", droplet_id),
            Err(e) => error!("Failed to destroy orphaned droplet {}: {}", droplet_id, e),
        }
    }

    /// The caller's deployments, newest first
    pub async fn list_deployments(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<deployments::Model>, DeploymentError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let rows = deployments::Entity::find()
            .filter(deployments::Column::UserId.eq(auth.user_id.as_str()))
            .order_by_desc(deployments::Column::CreatedAt)
            .all(&txn)
            .await?;
        txn.commit().await?;
        Ok(rows)
    }

    pub async fn get_deployment(
        &self,
        auth: &AuthContext,
        deployment_id: Uuid,
    ) -> Result<deployments::Model, DeploymentError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let found = find_owned_deployment(&txn, &auth.user_id, deployment_id).await?;
        txn.commit().await?;
        found.ok_or_else(|| DeploymentError::NotFound(deployment_id.to_string()))
    }

    /// Update history of one of the caller's deployments, newest first
    pub async fn list_history(
        &self,
        auth: &AuthContext,
        deployment_id: Uuid,
    ) -> Result<Vec<update_history::Model>, DeploymentError> {
        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        let Some(deployment) = find_owned_deployment(&txn, &auth.user_id, deployment_id).await?
        else {
            txn.commit().await?;
            return Err(DeploymentError::NotFound(deployment_id.to_string()));
        };

        let history = deployment
            .find_related(update_history::Entity)
            .order_by_desc(update_history::Column::CreatedAt)
            .order_by_desc(update_history::Column::Id)
            .all(&txn)
            .await?;
        txn.commit().await?;
        Ok(history)
    }

    /// Destroy the droplet, cancel the linked subscription and delete the row
    pub async fn teardown(
        &self,
        auth: &AuthContext,
        deployment_id: Uuid,
    ) -> Result<TeardownSummary, DeploymentError> {
        let deployment = self.get_deployment(auth, deployment_id).await?;

        let droplet_destroyed = match self
            .infrastructure
            .destroy_droplet(&deployment.droplet_id)
            .await
        {
            Ok(()) => true,
            Err(InfrastructureError::NotFound(message)) => {
                warn!(
                    "Droplet {} already gone during teardown of {}: {}",
                    deployment.droplet_id, deployment.id, message
                );
                false
            }
            Err(e) => return Err(e.into()),
        };

        let subscription_canceled = match deployment.subscription_id {
            Some(subscription_id) => {
                match self
                    .subscriptions
                    .cancel_subscription(auth, subscription_id)
                    .await
                {
                    Ok(_) => true,
                    Err(SubscriptionError::NotFound(_)) => {
                        warn!(
                            "Subscription {} linked to deployment {} no longer exists",
                            subscription_id, deployment.id
                        );
                        false
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => false,
        };

        let txn = begin_owner_scope(&self.db, &auth.user_id).await?;
        update_history::Entity::delete_many()
            .filter(update_history::Column::DeploymentId.eq(deployment.id))
            .exec(&txn)
            .await?;
        deployments::Entity::delete_many()
            .filter(deployments::Column::Id.eq(deployment.id))
            .filter(deployments::Column::UserId.eq(auth.user_id.as_str()))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(
            "Tore down deployment {} for user {} (droplet destroyed: {}, subscription canceled: {})",
            deployment.id, auth.user_id, droplet_destroyed, subscription_canceled
        );
        Ok(TeardownSummary {
            deployment_id: deployment.id,
            droplet_destroyed,
            subscription_canceled,
        })
    }

    /// Move a deployment along the lifecycle graph and record it in its history.
    ///
    /// Requesting the current status changes nothing.
    pub async fn transition(
        &self,
        deployment_id: Uuid,
        status: DeploymentStatus,
        source: &str,
        details: serde_json::Value,
    ) -> Result<TransitionOutcome, DeploymentError> {
        let txn = begin_system_scope(&self.db).await?;
        let Some(existing) = deployments::Entity::find_by_id(deployment_id)
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            return Err(DeploymentError::NotFound(deployment_id.to_string()));
        };

        let previous = existing.status;
        if previous == status {
            txn.commit().await?;
            return Ok(TransitionOutcome::Unchanged(existing));
        }
        if !previous.can_transition_to(status) {
            txn.commit().await?;
            return Err(DeploymentError::InvalidTransition {
                from: previous,
                to: status,
            });
        }

        let mut active: deployments::ActiveModel = existing.into();
        active.status = Set(status);
        let deployment = active.update(&txn).await?;

        append_history(
            &txn,
            &deployment,
            "status_changed",
            json!({
                "from": previous,
                "to": status,
                "source": source,
                "details": details,
            }),
        )
        .await?;
        txn.commit().await?;

        info!(
            "Deployment {} moved from {} to {} ({})",
            deployment.id, previous, status, source
        );
        Ok(TransitionOutcome::Applied {
            deployment,
            previous,
        })
    }

    /// Append `event` to the history of every deployment linked to a subscription.
    ///
    /// Returns how many deployments were annotated.
    pub async fn record_subscription_event(
        &self,
        subscription_id: Uuid,
        event: &str,
        details: serde_json::Value,
    ) -> Result<usize, DeploymentError> {
        let txn = begin_system_scope(&self.db).await?;
        let linked = deployments::Entity::find()
            .filter(deployments::Column::SubscriptionId.eq(subscription_id))
            .all(&txn)
            .await?;

        for deployment in &linked {
            append_history(&txn, deployment, event, details.clone()).await?;
        }
        txn.commit().await?;

        debug!(
            "Recorded '{}' on {} deployment(s) of subscription {}",
            event,
            linked.len(),
            subscription_id
        );
        Ok(linked.len())
    }

    pub async fn find_by_droplet(
        &self,
        droplet_id: &str,
    ) -> Result<Option<deployments::Model>, DeploymentError> {
        let txn = begin_system_scope(&self.db).await?;
        let found = deployments::Entity::find()
            .filter(deployments::Column::DropletId.eq(droplet_id))
            .one(&txn)
            .await?;
        txn.commit().await?;
        Ok(found)
    }

    /// Deployments whose droplet can still change state
    pub async fn live_deployments(&self) -> Result<Vec<deployments::Model>, DeploymentError> {
        let txn = begin_system_scope(&self.db).await?;
        let rows = deployments::Entity::find()
            .filter(deployments::Column::Status.is_in([
                DeploymentStatus::Pending,
                DeploymentStatus::Deploying,
                DeploymentStatus::Running,
            ]))
            .order_by_asc(deployments::Column::CreatedAt)
            .all(&txn)
            .await?;
        txn.commit().await?;
        Ok(rows)
    }

    pub fn infrastructure(&self) -> Arc<dyn InfrastructureProvider> {
        self.infrastructure.clone()
    }
}

fn droplet_name(deployment_id: Uuid) -> String {
    let id = deployment_id.simple().to_string();
    format!("ai-stack-{}", &id[..8])
}

/// Look up a deployment only if `user_id` owns it
pub async fn find_owned_deployment<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    deployment_id: Uuid,
) -> Result<Option<deployments::Model>, sea_orm::DbErr> {
    deployments::Entity::find_by_id(deployment_id)
        .filter(deployments::Column::UserId.eq(user_id))
        .one(conn)
        .await
}

async fn append_history<C: ConnectionTrait>(
    conn: &C,
    deployment: &deployments::Model,
    event: &str,
    details: serde_json::Value,
) -> Result<update_history::Model, sea_orm::DbErr> {
    update_history::ActiveModel {
        deployment_id: Set(deployment.id),
        user_id: Set(deployment.user_id.clone()),
        event: Set(event.to_string()),
        details: Set(details),
        ..Default::default()
    }
    .insert(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeInfrastructure;
    use stackdeploy_billing::test_utils::FakePayments;
    use stackdeploy_database::test_utils::TestDatabase;
    use stackdeploy_entities::subscriptions;
    use stackdeploy_entities::types::{Tier, UpdateSchedule};

    struct Harness {
        test_db: TestDatabase,
        infrastructure: Arc<FakeInfrastructure>,
        payments: Arc<FakePayments>,
        subscriptions: Arc<SubscriptionService>,
        service: DeploymentService,
    }

    async fn harness() -> anyhow::Result<Harness> {
        let test_db = TestDatabase::new().await?;
        let catalog = Arc::new(TemplateCatalog::bundled()?);
        let infrastructure = Arc::new(FakeInfrastructure::new());
        let payments = Arc::new(FakePayments::new());
        let subscriptions = Arc::new(SubscriptionService::new(
            test_db.db.clone(),
            catalog.clone(),
            payments.clone(),
        ));
        let service = DeploymentService::new(
            test_db.db.clone(),
            catalog,
            infrastructure.clone(),
            subscriptions.clone(),
            ProvisionSettings {
                droplet: DropletDefaults::default(),
                wait_attempts: 3,
                wait_interval: Duration::ZERO,
            },
        );
        Ok(Harness {
            test_db,
            infrastructure,
            payments,
            subscriptions,
            service,
        })
    }

    async fn subscribe(
        h: &Harness,
        auth: &AuthContext,
        plan: &str,
    ) -> anyhow::Result<subscriptions::Model> {
        Ok(h
            .subscriptions
            .create_subscription(auth, plan, "pm_card_visa")
            .await?
            .subscription)
    }

    async fn history_count(test_db: &TestDatabase) -> anyhow::Result<u64> {
        use sea_orm::PaginatorTrait;
        Ok(update_history::Entity::find().count(test_db.db.as_ref()).await?)
    }

    #[tokio::test]
    async fn test_deploy_records_running_droplet() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "notary-assistant").await?;

        let deployed = h
            .service
            .deploy(&auth, "notary-assistant", "pm_card_visa", subscription.id)
            .await?;

        let deployment = &deployed.deployment;
        assert_eq!(deployment.status, DeploymentStatus::Deploying);
        assert_eq!(deployment.template_id, "notary-assistant");
        assert_eq!(deployment.tier, Tier::Basic);
        assert!(!deployment.auto_update_enabled);
        assert_eq!(deployment.update_schedule, UpdateSchedule::Manual);
        assert!(deployment.url.starts_with("http://"));
        assert!(deployment.url.ends_with(":8080"));
        assert_eq!(deployment.subscription_id, Some(subscription.id));

        let requests = h.infrastructure.created();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name, droplet_name(deployment.id));
        assert_eq!(requests[0].region, "nyc1");
        assert!(requests[0].ipv6);
        assert!(requests[0].user_data.starts_with("#!/bin/bash"));
        assert_eq!(
            requests[0].tags,
            vec!["ai-deploy-notary-assistant", "user-user-1", "tier-basic"]
        );

        let history = h.service.list_history(&auth, deployment.id).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event, "created");
        Ok(())
    }

    #[tokio::test]
    async fn test_pro_tier_gets_monthly_updates() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "rag-app-pro").await?;

        let deployed = h
            .service
            .deploy(&auth, "rag-app", "pm_card_visa", subscription.id)
            .await?;
        assert_eq!(deployed.deployment.tier, Tier::Pro);
        assert!(deployed.deployment.auto_update_enabled);
        assert_eq!(deployed.deployment.update_schedule, UpdateSchedule::Monthly);
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_rejection_writes_no_row() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "ai-agent").await?;
        h.infrastructure.reject_next("You have reached your droplet limit.");

        let result = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await;
        assert!(matches!(
            result,
            Err(DeploymentError::Infrastructure(InfrastructureError::Rejected(_)))
        ));

        assert!(h.service.list_deployments(&auth).await?.is_empty());
        assert_eq!(history_count(&h.test_db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_address_timeout_destroys_droplet() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "ai-agent").await?;
        h.infrastructure.withhold_addresses();

        let result = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await;
        assert!(matches!(result, Err(DeploymentError::Infrastructure(_))));

        assert!(h.service.list_deployments(&auth).await?.is_empty());
        assert_eq!(h.infrastructure.destroyed().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_deploy_requires_active_matching_subscription() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "rag-app-pro").await?;

        let wrong_template = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await;
        assert!(matches!(wrong_template, Err(DeploymentError::Validation(_))));

        let wrong_tier = h
            .service
            .deploy(&auth, "rag-app-enterprise", "pm_card_visa", subscription.id)
            .await;
        assert!(matches!(wrong_tier, Err(DeploymentError::Validation(_))));

        let unknown = h
            .service
            .deploy(&auth, "rag-app", "pm_card_visa", Uuid::new_v4())
            .await;
        assert!(matches!(
            unknown,
            Err(DeploymentError::Subscription(SubscriptionError::NotFound(_)))
        ));

        h.subscriptions
            .apply_provider_status(&subscription.stripe_subscription_id, SubscriptionStatus::PastDue)
            .await?;
        let inactive = h
            .service
            .deploy(&auth, "rag-app-pro", "pm_card_visa", subscription.id)
            .await;
        assert!(matches!(
            inactive,
            Err(DeploymentError::SubscriptionInactive { status: SubscriptionStatus::PastDue, .. })
        ));

        assert!(h.infrastructure.created().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_other_users_cannot_see_or_tear_down() -> anyhow::Result<()> {
        let h = harness().await?;
        let alice = AuthContext::new("alice", "alice@example.com");
        let bob = AuthContext::new("bob", "bob@example.com");
        let subscription = subscribe(&h, &alice, "ai-agent").await?;
        let deployed = h
            .service
            .deploy(&alice, "ai-agent", "pm_card_visa", subscription.id)
            .await?;

        let borrowed = h
            .service
            .deploy(&bob, "ai-agent", "pm_card_visa", subscription.id)
            .await;
        assert!(matches!(borrowed, Err(DeploymentError::Subscription(_))));

        assert!(h.service.list_deployments(&bob).await?.is_empty());
        assert!(matches!(
            h.service.list_history(&bob, deployed.deployment.id).await,
            Err(DeploymentError::NotFound(_))
        ));
        assert!(matches!(
            h.service.teardown(&bob, deployed.deployment.id).await,
            Err(DeploymentError::NotFound(_))
        ));
        assert_eq!(h.service.list_deployments(&alice).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_follows_lifecycle() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "ai-agent").await?;
        let id = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await?
            .deployment
            .id;

        let outcome = h
            .service
            .transition(id, DeploymentStatus::Running, "poller", json!({}))
            .await?;
        assert!(matches!(
            outcome,
            TransitionOutcome::Applied { previous: DeploymentStatus::Deploying, .. }
        ));

        let repeated = h
            .service
            .transition(id, DeploymentStatus::Running, "poller", json!({}))
            .await?;
        assert!(matches!(repeated, TransitionOutcome::Unchanged(_)));

        let backwards = h
            .service
            .transition(id, DeploymentStatus::Deploying, "webhook", json!({}))
            .await;
        assert!(matches!(
            backwards,
            Err(DeploymentError::InvalidTransition { .. })
        ));

        let history = h.service.list_history(&auth, id).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event, "status_changed");
        assert_eq!(history[0].details["to"], "running");
        assert_eq!(history[0].details["source"], "poller");
        Ok(())
    }

    #[tokio::test]
    async fn test_teardown_cancels_subscription() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "ai-agent").await?;
        let deployed = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await?;

        let summary = h.service.teardown(&auth, deployed.deployment.id).await?;
        assert!(summary.droplet_destroyed);
        assert!(summary.subscription_canceled);

        assert!(h.service.list_deployments(&auth).await?.is_empty());
        assert_eq!(history_count(&h.test_db).await?, 0);
        assert_eq!(
            h.subscriptions.get_subscription(&auth, subscription.id).await?.status,
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            h.payments.canceled(),
            vec![subscription.stripe_subscription_id.clone()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_teardown_tolerates_missing_droplet() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "ai-agent").await?;
        let deployed = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await?;
        h.infrastructure.remove(&deployed.deployment.droplet_id);

        let summary = h.service.teardown(&auth, deployed.deployment.id).await?;
        assert!(!summary.droplet_destroyed);
        assert!(h.service.list_deployments(&auth).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_events_annotate_linked_deployments() -> anyhow::Result<()> {
        let h = harness().await?;
        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscribe(&h, &auth, "ai-agent").await?;
        let deployed = h
            .service
            .deploy(&auth, "ai-agent", "pm_card_visa", subscription.id)
            .await?;

        let annotated = h
            .service
            .record_subscription_event(
                subscription.id,
                "payment_failed",
                json!({ "invoice_id": "in_1" }),
            )
            .await?;
        assert_eq!(annotated, 1);

        let history = h.service.list_history(&auth, deployed.deployment.id).await?;
        assert!(history.iter().any(|e| e.event == "payment_failed"));
        Ok(())
    }
}
