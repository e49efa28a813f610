use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use stackdeploy_core::problemdetails::Problem;
use stackdeploy_deployments::TransitionOutcome;
use stackdeploy_entities::types::DeploymentStatus;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::service::StripeOutcome;
use crate::WebhookService;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const INFRASTRUCTURE_SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StripeWebhookResponse {
    pub status: String,
    pub event_type: String,
    /// Whether the event changed local state
    pub handled: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InfrastructureWebhookResponse {
    pub status: String,
    pub deployment_id: Uuid,
    pub deployment_status: DeploymentStatus,
    pub changed: bool,
}

#[derive(OpenApi)]
#[openapi(
    paths(stripe_webhook, infrastructure_webhook),
    components(schemas(StripeWebhookResponse, InfrastructureWebhookResponse)),
    tags((name = "Webhooks", description = "Signed provider callbacks"))
)]
pub struct WebhooksApiDoc;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Stripe subscription and invoice events
#[utoipa::path(
    post,
    path = "/webhook/stripe",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Event accepted", body = StripeWebhookResponse),
        (status = 400, description = "Missing or invalid signature, or malformed event")
    )
)]
pub async fn stripe_webhook(
    State(service): State<Arc<WebhookService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    let outcome = service
        .handle_stripe(
            header(&headers, STRIPE_SIGNATURE_HEADER),
            &body,
            chrono::Utc::now().timestamp(),
        )
        .await?;

    let (event_type, handled) = match outcome {
        StripeOutcome::Applied { event_type, .. } => (event_type, true),
        StripeOutcome::Ignored { event_type } => (event_type, false),
    };
    Ok(Json(StripeWebhookResponse {
        status: "success".to_string(),
        event_type,
        handled,
    }))
}

/// Droplet status reports from the infrastructure provider
#[utoipa::path(
    post,
    path = "/webhook/infrastructure",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json"),
    params(("X-Signature" = String, Header, description = "sha256=<hex hmac of body>")),
    responses(
        (status = 200, description = "Status applied", body = InfrastructureWebhookResponse),
        (status = 400, description = "Missing or invalid signature, or malformed body"),
        (status = 404, description = "No deployment for the droplet"),
        (status = 409, description = "Status change not allowed")
    )
)]
pub async fn infrastructure_webhook(
    State(service): State<Arc<WebhookService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Problem> {
    let outcome = service
        .handle_infrastructure(header(&headers, INFRASTRUCTURE_SIGNATURE_HEADER), &body)
        .await?;

    let (deployment, changed) = match outcome {
        TransitionOutcome::Applied { deployment, .. } => (deployment, true),
        TransitionOutcome::Unchanged(deployment) => (deployment, false),
    };
    Ok(Json(InfrastructureWebhookResponse {
        status: "success".to_string(),
        deployment_id: deployment.id,
        deployment_status: deployment.status,
        changed,
    }))
}

pub fn configure_routes() -> Router<Arc<WebhookService>> {
    Router::new()
        .route("/webhook/stripe", post(stripe_webhook))
        .route("/webhook/infrastructure", post(infrastructure_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{body_signature_header, stripe_signature_header};
    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use stackdeploy_auth::AuthContext;
    use stackdeploy_billing::test_utils::FakePayments;
    use stackdeploy_billing::SubscriptionService;
    use stackdeploy_catalog::TemplateCatalog;
    use stackdeploy_config::DropletDefaults;
    use stackdeploy_database::test_utils::TestDatabase;
    use stackdeploy_deployments::test_utils::FakeInfrastructure;
    use stackdeploy_deployments::{DeploymentService, ProvisionSettings};
    use stackdeploy_entities::subscriptions;
    use stackdeploy_entities::types::SubscriptionStatus;
    use std::time::Duration;
    use tower::ServiceExt;

    const STRIPE_SECRET: &str = "whsec_test";
    const INFRA_SECRET: &str = "infra_secret";

    struct Fixture {
        _test_db: TestDatabase,
        auth: AuthContext,
        subscriptions: Arc<SubscriptionService>,
        deployments: Arc<DeploymentService>,
        subscription: subscriptions::Model,
        deployment_id: Uuid,
        droplet_id: String,
        router: Router,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let test_db = TestDatabase::new().await?;
        let catalog = Arc::new(TemplateCatalog::bundled()?);
        let subscriptions = Arc::new(SubscriptionService::new(
            test_db.db.clone(),
            catalog.clone(),
            Arc::new(FakePayments::new()),
        ));
        let deployments = Arc::new(DeploymentService::new(
            test_db.db.clone(),
            catalog,
            Arc::new(FakeInfrastructure::new()),
            subscriptions.clone(),
            ProvisionSettings {
                droplet: DropletDefaults::default(),
                wait_attempts: 2,
                wait_interval: Duration::ZERO,
            },
        ));

        let auth = AuthContext::new("user-1", "a@example.com");
        let subscription = subscriptions
            .create_subscription(&auth, "rag-app-pro", "pm_card_visa")
            .await?
            .subscription;
        let deployment = deployments
            .deploy(&auth, "rag-app", "pm_card_visa", subscription.id)
            .await?
            .deployment;

        let service = Arc::new(WebhookService::new(
            subscriptions.clone(),
            deployments.clone(),
            STRIPE_SECRET,
            INFRA_SECRET,
        ));

        Ok(Fixture {
            _test_db: test_db,
            auth,
            subscriptions,
            deployments,
            subscription,
            deployment_id: deployment.id,
            droplet_id: deployment.droplet_id,
            router: configure_routes().with_state(service),
        })
    }

    fn stripe_request(payload: &serde_json::Value, secret: &str) -> axum::http::Request<Body> {
        let body = payload.to_string();
        let signature =
            stripe_signature_header(secret, chrono::Utc::now().timestamp(), body.as_bytes())
                .unwrap();
        axum::http::Request::builder()
            .method("POST")
            .uri("/webhook/stripe")
            .header("Content-Type", "application/json")
            .header("Stripe-Signature", signature)
            .body(Body::from(body))
            .unwrap()
    }

    fn infrastructure_request(payload: &serde_json::Value) -> axum::http::Request<Body> {
        let body = payload.to_string();
        let signature = body_signature_header(INFRA_SECRET, body.as_bytes()).unwrap();
        axum::http::Request::builder()
            .method("POST")
            .uri("/webhook/infrastructure")
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_subscription_update_sets_status_and_history() -> anyhow::Result<()> {
        let f = fixture().await?;
        let event = serde_json::json!({
            "id": "evt_1",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": f.subscription.stripe_subscription_id,
                "status": "past_due"
            } }
        });

        let response = f.router.clone().oneshot(stripe_request(&event, STRIPE_SECRET)).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["handled"], true);

        let subscription = f
            .subscriptions
            .get_subscription(&f.auth, f.subscription.id)
            .await?;
        assert_eq!(subscription.status, SubscriptionStatus::PastDue);

        let history = f.deployments.list_history(&f.auth, f.deployment_id).await?;
        assert_eq!(history[0].event, "subscription_status_changed");
        assert_eq!(history[0].details["to"], "past_due");
        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_deleted_cancels() -> anyhow::Result<()> {
        let f = fixture().await?;
        let event = serde_json::json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": { "object": {
                "id": f.subscription.stripe_subscription_id,
                "status": "canceled"
            } }
        });

        let response = f.router.clone().oneshot(stripe_request(&event, STRIPE_SECRET)).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let subscription = f
            .subscriptions
            .get_subscription(&f.auth, f.subscription.id)
            .await?;
        assert_eq!(subscription.status, SubscriptionStatus::Canceled);
        Ok(())
    }

    #[tokio::test]
    async fn test_late_events_leave_canceled_subscription_alone() -> anyhow::Result<()> {
        let f = fixture().await?;
        f.subscriptions
            .cancel_subscription(&f.auth, f.subscription.id)
            .await?;

        let events = [
            serde_json::json!({
                "id": "evt_late_invoice",
                "type": "invoice.payment_failed",
                "data": { "object": {
                    "id": "in_late",
                    "subscription": f.subscription.stripe_subscription_id,
                    "attempt_count": 2
                } }
            }),
            serde_json::json!({
                "id": "evt_late_update",
                "type": "customer.subscription.updated",
                "data": { "object": {
                    "id": f.subscription.stripe_subscription_id,
                    "status": "active"
                } }
            }),
        ];
        for event in &events {
            let response = f.router.clone().oneshot(stripe_request(event, STRIPE_SECRET)).await?;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await["handled"], false);
        }

        let subscription = f
            .subscriptions
            .get_subscription(&f.auth, f.subscription.id)
            .await?;
        assert_eq!(subscription.status, SubscriptionStatus::Canceled);

        let history = f.deployments.list_history(&f.auth, f.deployment_id).await?;
        assert!(history.iter().all(|entry| entry.event == "created"));
        Ok(())
    }

    #[tokio::test]
    async fn test_payment_failed_marks_past_due() -> anyhow::Result<()> {
        let f = fixture().await?;
        let event = serde_json::json!({
            "id": "evt_3",
            "type": "invoice.payment_failed",
            "data": { "object": {
                "id": "in_1",
                "subscription": f.subscription.stripe_subscription_id,
                "attempt_count": 1
            } }
        });

        let response = f.router.clone().oneshot(stripe_request(&event, STRIPE_SECRET)).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let subscription = f
            .subscriptions
            .get_subscription(&f.auth, f.subscription.id)
            .await?;
        assert_eq!(subscription.status, SubscriptionStatus::PastDue);

        let history = f.deployments.list_history(&f.auth, f.deployment_id).await?;
        assert_eq!(history[0].event, "payment_failed");
        assert_eq!(history[0].details["invoice_id"], "in_1");
        Ok(())
    }

    #[tokio::test]
    async fn test_other_events_are_acknowledged() -> anyhow::Result<()> {
        let f = fixture().await?;
        let event = serde_json::json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        });

        let response = f.router.clone().oneshot(stripe_request(&event, STRIPE_SECRET)).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["handled"], false);
        assert_eq!(body["event_type"], "customer.created");
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_stripe_signature_is_bad_request() -> anyhow::Result<()> {
        let f = fixture().await?;
        let event = serde_json::json!({
            "id": "evt_5",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": f.subscription.stripe_subscription_id,
                "status": "canceled"
            } }
        });

        let response = f.router.clone().oneshot(stripe_request(&event, "whsec_other")).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let unsigned = axum::http::Request::builder()
            .method("POST")
            .uri("/webhook/stripe")
            .body(Body::from(event.to_string()))?;
        let response = f.router.clone().oneshot(unsigned).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let subscription = f
            .subscriptions
            .get_subscription(&f.auth, f.subscription.id)
            .await?;
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        Ok(())
    }

    #[tokio::test]
    async fn test_infrastructure_report_transitions_deployment() -> anyhow::Result<()> {
        let f = fixture().await?;
        let droplet_id: i64 = f.droplet_id.parse()?;

        let response = f
            .router
            .clone()
            .oneshot(infrastructure_request(&serde_json::json!({
                "droplet_id": droplet_id,
                "status": "active",
                "details": { "boot_seconds": 42 }
            })))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["deployment_status"], "running");
        assert_eq!(body["changed"], true);

        let history = f.deployments.list_history(&f.auth, f.deployment_id).await?;
        assert_eq!(history[0].event, "status_changed");
        assert_eq!(history[0].details["source"], "infrastructure_webhook");

        let response = f
            .router
            .clone()
            .oneshot(infrastructure_request(&serde_json::json!({
                "droplet_id": f.droplet_id,
                "status": "new"
            })))
            .await?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn test_infrastructure_report_for_unknown_droplet() -> anyhow::Result<()> {
        let f = fixture().await?;
        let response = f
            .router
            .clone()
            .oneshot(infrastructure_request(&serde_json::json!({
                "droplet_id": "999999",
                "status": "off"
            })))
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn test_infrastructure_report_requires_signature() -> anyhow::Result<()> {
        let f = fixture().await?;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/webhook/infrastructure")
            .header("X-Signature", "sha256=00")
            .body(Body::from(
                serde_json::json!({ "droplet_id": f.droplet_id, "status": "off" }).to_string(),
            ))?;

        let response = f.router.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
