use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use stackdeploy_billing::SubscriptionService;
use stackdeploy_deployments::{
    map_droplet_status, DeploymentError, DeploymentService, TransitionOutcome,
};
use stackdeploy_entities::deployments;
use stackdeploy_entities::types::SubscriptionStatus;
use tracing::{debug, info, warn};

use crate::signature::{verify_body_signature, verify_stripe_signature};
use crate::WebhookError;

/// Stripe event envelope; only the fields used here
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Status report relayed from the infrastructure provider
#[derive(Debug, Deserialize)]
pub struct InfrastructureEvent {
    /// DigitalOcean sends numeric ids; relays sometimes stringify them
    pub droplet_id: serde_json::Value,
    pub status: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StripeOutcome {
    /// The event changed or confirmed a local subscription
    Applied {
        event_type: String,
        deployments_annotated: usize,
    },
    /// Acknowledged without local effect
    Ignored { event_type: String },
}

pub struct WebhookService {
    subscriptions: Arc<SubscriptionService>,
    deployments: Arc<DeploymentService>,
    stripe_secret: String,
    infrastructure_secret: String,
}

impl WebhookService {
    pub fn new(
        subscriptions: Arc<SubscriptionService>,
        deployments: Arc<DeploymentService>,
        stripe_secret: impl Into<String>,
        infrastructure_secret: impl Into<String>,
    ) -> Self {
        Self {
            subscriptions,
            deployments,
            stripe_secret: stripe_secret.into(),
            infrastructure_secret: infrastructure_secret.into(),
        }
    }

    /// Verify and apply a Stripe event delivered at unix time `now`
    pub async fn handle_stripe(
        &self,
        signature: Option<&str>,
        payload: &[u8],
        now: i64,
    ) -> Result<StripeOutcome, WebhookError> {
        if self.stripe_secret.is_empty() {
            return Err(WebhookError::NotConfigured("STRIPE_WEBHOOK_SECRET"));
        }
        let signature = signature.ok_or(WebhookError::MissingSignature("Stripe-Signature"))?;
        verify_stripe_signature(&self.stripe_secret, signature, payload, now)?;

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::Payload(e.to_string()))?;
        debug!("Stripe event {} ({})", event.id, event.event_type);

        match event.event_type.as_str() {
            "customer.subscription.updated" | "customer.subscription.deleted" => {
                self.subscription_changed(&event).await
            }
            "invoice.payment_failed" => self.payment_failed(&event).await,
            _ => {
                debug!("Ignoring Stripe event type {}", event.event_type);
                Ok(StripeOutcome::Ignored {
                    event_type: event.event_type,
                })
            }
        }
    }

    async fn subscription_changed(
        &self,
        event: &StripeEvent,
    ) -> Result<StripeOutcome, WebhookError> {
        let object = &event.data.object;
        let stripe_subscription_id = string_field(object, "id")?;

        let status = if event.event_type == "customer.subscription.deleted" {
            SubscriptionStatus::Canceled
        } else {
            let reported = string_field(object, "status")?;
            match SubscriptionStatus::from_str(&reported) {
                Some(status) => status,
                None => {
                    warn!(
                        "Stripe reported unknown status '{}' for {}",
                        reported, stripe_subscription_id
                    );
                    return Ok(self.ignored(event));
                }
            }
        };

        let Some((subscription, previous)) = self
            .subscriptions
            .apply_provider_status(&stripe_subscription_id, status)
            .await?
        else {
            info!(
                "Stripe event {} names unknown subscription {}",
                event.id, stripe_subscription_id
            );
            return Ok(self.ignored(event));
        };

        if subscription.status != status {
            info!(
                "Stripe event {} left canceled subscription {} unchanged",
                event.id, stripe_subscription_id
            );
            return Ok(self.ignored(event));
        }

        let deployments_annotated = if previous == status {
            0
        } else {
            self.deployments
                .record_subscription_event(
                    subscription.id,
                    "subscription_status_changed",
                    json!({
                        "from": previous,
                        "to": status,
                        "stripe_event_id": event.id,
                        "stripe_event_type": event.event_type,
                    }),
                )
                .await?
        };

        Ok(StripeOutcome::Applied {
            event_type: event.event_type.clone(),
            deployments_annotated,
        })
    }

    async fn payment_failed(&self, event: &StripeEvent) -> Result<StripeOutcome, WebhookError> {
        let object = &event.data.object;
        let invoice_id = string_field(object, "id")?;
        let Some(stripe_subscription_id) = object.get("subscription").and_then(|s| s.as_str())
        else {
            warn!("Failed invoice {} is not tied to a subscription", invoice_id);
            return Ok(self.ignored(event));
        };

        let Some((subscription, previous)) = self
            .subscriptions
            .apply_provider_status(stripe_subscription_id, SubscriptionStatus::PastDue)
            .await?
        else {
            info!(
                "Failed invoice {} names unknown subscription {}",
                invoice_id, stripe_subscription_id
            );
            return Ok(self.ignored(event));
        };

        if subscription.status != SubscriptionStatus::PastDue {
            info!(
                "Failed invoice {} ignored for {} subscription {}",
                invoice_id, subscription.status, subscription.id
            );
            return Ok(self.ignored(event));
        }

        warn!(
            "Payment failed for subscription {} (invoice {})",
            subscription.id, invoice_id
        );
        let deployments_annotated = self
            .deployments
            .record_subscription_event(
                subscription.id,
                "payment_failed",
                json!({
                    "invoice_id": invoice_id,
                    "previous_status": previous,
                    "attempt_count": object.get("attempt_count"),
                    "stripe_event_id": event.id,
                }),
            )
            .await?;

        Ok(StripeOutcome::Applied {
            event_type: event.event_type.clone(),
            deployments_annotated,
        })
    }

    fn ignored(&self, event: &StripeEvent) -> StripeOutcome {
        StripeOutcome::Ignored {
            event_type: event.event_type.clone(),
        }
    }

    /// Verify and apply a droplet status report
    pub async fn handle_infrastructure(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<TransitionOutcome, WebhookError> {
        if self.infrastructure_secret.is_empty() {
            return Err(WebhookError::NotConfigured("INFRA_WEBHOOK_SECRET"));
        }
        let signature = signature.ok_or(WebhookError::MissingSignature("X-Signature"))?;
        verify_body_signature(&self.infrastructure_secret, signature, body)?;

        let event: InfrastructureEvent =
            serde_json::from_slice(body).map_err(|e| WebhookError::Payload(e.to_string()))?;
        let droplet_id = match &event.droplet_id {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(WebhookError::Payload(format!(
                    "droplet_id must be a string or number, got {}",
                    other
                )))
            }
        };
        let status = map_droplet_status(&event.status).ok_or_else(|| {
            WebhookError::Payload(format!("Unknown droplet status '{}'", event.status))
        })?;

        let deployment: deployments::Model = self
            .deployments
            .find_by_droplet(&droplet_id)
            .await?
            .ok_or_else(|| DeploymentError::NotFound(format!("for droplet {}", droplet_id)))?;

        let outcome = self
            .deployments
            .transition(
                deployment.id,
                status,
                "infrastructure_webhook",
                json!({
                    "droplet_id": droplet_id,
                    "droplet_status": event.status,
                    "details": event.details,
                }),
            )
            .await?;
        Ok(outcome)
    }
}

fn string_field(object: &serde_json::Value, key: &str) -> Result<String, WebhookError> {
    object
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| WebhookError::Payload(format!("event object has no '{}'", key)))
}
