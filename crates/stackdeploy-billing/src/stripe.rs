//! Stripe payments provider
//!
//! Talks to the Stripe REST API with form-encoded bodies authenticated by the
//! secret key. Card and parameter errors come back as `Rejected` carrying
//! Stripe's message; network failures, 5xx and credential problems come back
//! as `Transport`.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use stackdeploy_config::DEFAULT_STRIPE_API_BASE;
use tracing::{debug, info, warn};

use crate::provider::{
    NewCustomer, NewSubscription, PaymentsError, PaymentsProvider, ProviderCustomer,
    ProviderSubscription,
};

pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
    #[serde(default)]
    latest_invoice: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl StripeSubscription {
    fn into_provider(self) -> ProviderSubscription {
        let client_secret = self
            .latest_invoice
            .as_ref()
            .and_then(|invoice| invoice.pointer("/payment_intent/client_secret"))
            .and_then(|secret| secret.as_str())
            .map(str::to_string);

        ProviderSubscription {
            id: self.id,
            status: self.status,
            client_secret,
        }
    }
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Result<Self, PaymentsError> {
        Self::with_base_url(secret_key, DEFAULT_STRIPE_API_BASE)
    }

    /// Point the client at another API root (stripe-mock, tests)
    pub fn with_base_url(
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, PaymentsError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentsError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            secret_key: secret_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn api_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, PaymentsError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Stripe API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.secret_key);
        if !form.is_empty() {
            request = request.form(form);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PaymentsError::Transport(format!("Stripe request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentsError::Transport(format!("Failed to read Stripe response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            PaymentsError::Transport(format!("Failed to parse Stripe response: {}", e))
        })
    }

    fn classify_error(status: StatusCode, body: &str) -> PaymentsError {
        let parsed = serde_json::from_str::<StripeErrorEnvelope>(body)
            .ok()
            .map(|e| e.error);
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("Stripe returned status {}", status));

        warn!(
            "Stripe API error ({}, {}): {}",
            status,
            parsed
                .as_ref()
                .and_then(|e| e.kind.as_deref())
                .unwrap_or("unknown"),
            message
        );

        match status {
            StatusCode::NOT_FOUND => PaymentsError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaymentsError::Transport(
                "Payments provider rejected the configured credentials".to_string(),
            ),
            StatusCode::TOO_MANY_REQUESTS => PaymentsError::Transport(message),
            s if s.is_client_error() => PaymentsError::Rejected {
                code: parsed.and_then(|e| e.code),
                message,
            },
            _ => PaymentsError::Transport(message),
        }
    }
}

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl PaymentsProvider for StripeClient {
    async fn create_customer(
        &self,
        customer: &NewCustomer,
    ) -> Result<ProviderCustomer, PaymentsError> {
        let form = vec![
            field("email", &customer.email),
            field("payment_method", &customer.payment_method_id),
            field(
                "invoice_settings[default_payment_method]",
                &customer.payment_method_id,
            ),
            field("metadata[user_id]", &customer.user_id),
        ];

        let created: StripeObject = self.api_request(Method::POST, "/customers", &form).await?;
        info!("Created Stripe customer {} for user {}", created.id, customer.user_id);
        Ok(ProviderCustomer { id: created.id })
    }

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<ProviderSubscription, PaymentsError> {
        // Subscription items cannot create products inline, so the recurring
        // price (and its product) is created first.
        let price_form = vec![
            field("currency", "usd"),
            field("unit_amount", subscription.unit_amount),
            field("recurring[interval]", "month"),
            field("product_data[name]", &subscription.product_name),
            field("metadata[plan_type]", &subscription.plan_type),
        ];
        let price: StripeObject = self.api_request(Method::POST, "/prices", &price_form).await?;

        let form = vec![
            field("customer", &subscription.customer_id),
            field("items[0][price]", &price.id),
            field("expand[]", "latest_invoice.payment_intent"),
            field("metadata[user_id]", &subscription.user_id),
            field("metadata[plan_type]", &subscription.plan_type),
            field("metadata[template_id]", &subscription.template_id),
        ];
        let created: StripeSubscription = self
            .api_request(Method::POST, "/subscriptions", &form)
            .await?;

        info!(
            "Created Stripe subscription {} ({}) for user {}",
            created.id, created.status, subscription.user_id
        );
        Ok(created.into_provider())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, PaymentsError> {
        let canceled: StripeSubscription = self
            .api_request(
                Method::DELETE,
                &format!("/subscriptions/{}", subscription_id),
                &[],
            )
            .await?;
        info!("Canceled Stripe subscription {}", canceled.id);
        Ok(canceled.into_provider())
    }
}
