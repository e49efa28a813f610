//! Background refresh of deployment status from the infrastructure provider

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stackdeploy_entities::deployments;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::provider::{map_droplet_status, InfrastructureError};
use crate::{DeploymentError, DeploymentService, TransitionOutcome};

/// Counts from one pass over the live deployments
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub checked: usize,
    pub transitioned: usize,
    pub failed_lookups: usize,
}

pub struct StatusPoller {
    service: Arc<DeploymentService>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(service: Arc<DeploymentService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll every `interval` until the token is cancelled
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!("Starting status poller (every {:?})", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(summary) if summary.transitioned > 0 => {
                            info!(
                                "Status poll checked {} deployment(s), {} changed",
                                summary.checked, summary.transitioned
                            );
                        }
                        Ok(summary) => {
                            debug!("Status poll checked {} deployment(s)", summary.checked);
                        }
                        Err(e) => error!("Status poll failed: {}", e),
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Status poller received cancellation signal");
                    return;
                }
            }
        }
    }

    /// Read each pending, deploying or running droplet once and apply any
    /// legal status change.
    pub async fn poll_once(&self) -> Result<PollSummary, DeploymentError> {
        let live = self.service.live_deployments().await?;
        let mut summary = PollSummary::default();

        for deployment in live {
            summary.checked += 1;
            match self.refresh(&deployment).await {
                Ok(true) => summary.transitioned += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed_lookups += 1;
                    warn!(
                        "Could not refresh deployment {} (droplet {}): {}",
                        deployment.id, deployment.droplet_id, e
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn refresh(&self, deployment: &deployments::Model) -> Result<bool, DeploymentError> {
        let provider_status = match self
            .service
            .infrastructure()
            .get_droplet(&deployment.droplet_id)
            .await
        {
            Ok(droplet) => droplet.status,
            Err(InfrastructureError::NotFound(_)) => "archive".to_string(),
            Err(e) => return Err(e.into()),
        };

        let Some(target) = map_droplet_status(&provider_status) else {
            debug!(
                "Ignoring droplet status '{}' for deployment {}",
                provider_status, deployment.id
            );
            return Ok(false);
        };
        if target == deployment.status || !deployment.status.can_transition_to(target) {
            return Ok(false);
        }

        let outcome = self
            .service
            .transition(
                deployment.id,
                target,
                "poller",
                json!({ "droplet_status": provider_status }),
            )
            .await?;
        Ok(matches!(outcome, TransitionOutcome::Applied { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeInfrastructure;
    use crate::ProvisionSettings;
    use stackdeploy_auth::AuthContext;
    use stackdeploy_billing::test_utils::FakePayments;
    use stackdeploy_billing::SubscriptionService;
    use stackdeploy_catalog::TemplateCatalog;
    use stackdeploy_config::DropletDefaults;
    use stackdeploy_database::test_utils::TestDatabase;
    use stackdeploy_entities::types::DeploymentStatus;

    async fn setup() -> anyhow::Result<(
        TestDatabase,
        Arc<FakeInfrastructure>,
        Arc<DeploymentService>,
        AuthContext,
        deployments::Model,
    )> {
        let test_db = TestDatabase::new().await?;
        let catalog = Arc::new(TemplateCatalog::bundled()?);
        let infrastructure = Arc::new(FakeInfrastructure::new());
        let subscriptions = Arc::new(SubscriptionService::new(
            test_db.db.clone(),
            catalog.clone(),
            Arc::new(FakePayments::new()),
        ));
        let service = Arc::new(DeploymentService::new(
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

        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscriptions
            .create_subscription(&auth, "ollama-webui", "pm_card_visa")
            .await?
            .subscription;
        let deployment = service
            .deploy(&auth, "ollama-webui", "pm_card_visa", subscription.id)
            .await?
            .deployment;

        Ok((test_db, infrastructure, service, auth, deployment))
    }

    #[tokio::test]
    async fn test_poll_moves_active_droplet_to_running_once() -> anyhow::Result<()> {
        let (_db, _infra, service, auth, deployment) = setup().await?;
        let poller = StatusPoller::new(service.clone(), Duration::from_secs(30));

        let first = poller.poll_once().await?;
        assert_eq!(first.checked, 1);
        assert_eq!(first.transitioned, 1);

        let second = poller.poll_once().await?;
        assert_eq!(second.transitioned, 0);

        let listed = service.list_deployments(&auth).await?;
        assert_eq!(listed[0].status, DeploymentStatus::Running);
        let history = service.list_history(&auth, deployment.id).await?;
        assert_eq!(history.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_vanished_droplet_marks_failed() -> anyhow::Result<()> {
        let (_db, infra, service, auth, deployment) = setup().await?;
        infra.remove(&deployment.droplet_id);
        let poller = StatusPoller::new(service.clone(), Duration::from_secs(30));

        poller.poll_once().await?;
        let listed = service.list_deployments(&auth).await?;
        assert_eq!(listed[0].status, DeploymentStatus::Failed);

        let after = poller.poll_once().await?;
        assert_eq!(after.checked, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_powered_off_droplet_stops_running_deployment() -> anyhow::Result<()> {
        let (_db, infra, service, auth, deployment) = setup().await?;
        let poller = StatusPoller::new(service.clone(), Duration::from_secs(30));
        poller.poll_once().await?;

        infra.set_status(&deployment.droplet_id, "off");
        poller.poll_once().await?;

        let listed = service.list_deployments(&auth).await?;
        assert_eq!(listed[0].status, DeploymentStatus::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() -> anyhow::Result<()> {
        let (_db, _infra, service, _auth, _deployment) = setup().await?;
        let poller = StatusPoller::new(service, Duration::from_millis(10));
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), poller.run(token)).await?;
        Ok(())
    }
}
