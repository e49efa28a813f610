//! DigitalOcean infrastructure provider
//!
//! Creates, inspects and destroys droplets through the DigitalOcean v2 API.
//! Requires a Personal Access Token with read/write scope.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use stackdeploy_config::DEFAULT_DIGITALOCEAN_API_BASE;
use tracing::{debug, info, warn};

use crate::provider::{Droplet, InfrastructureError, InfrastructureProvider, NewDroplet};

pub struct DigitalOceanClient {
    client: Client,
    api_token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: DoDroplet,
}

#[derive(Debug, Deserialize)]
struct DoDroplet {
    id: i64,
    status: String,
    #[serde(default)]
    networks: DoNetworks,
}

#[derive(Debug, Default, Deserialize)]
struct DoNetworks {
    #[serde(default)]
    v4: Vec<DoNetworkV4>,
}

#[derive(Debug, Deserialize)]
struct DoNetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    network_type: String,
}

#[derive(Debug, Deserialize)]
struct DoErrorResponse {
    id: String,
    message: String,
}

impl From<DoDroplet> for Droplet {
    fn from(droplet: DoDroplet) -> Self {
        let public_ipv4 = droplet
            .networks
            .v4
            .into_iter()
            .find(|n| n.network_type == "public")
            .map(|n| n.ip_address);

        Droplet {
            id: droplet.id.to_string(),
            status: droplet.status,
            public_ipv4,
        }
    }
}

impl DigitalOceanClient {
    pub fn new(api_token: impl Into<String>) -> Result<Self, InfrastructureError> {
        Self::with_base_url(api_token, DEFAULT_DIGITALOCEAN_API_BASE)
    }

    /// Create a client against a custom API root (tests)
    pub fn with_base_url(
        api_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, InfrastructureError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                InfrastructureError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_token: api_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Make an authenticated request and return the raw body of a successful response
    async fn api_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<String, InfrastructureError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("DigitalOcean API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            InfrastructureError::Transport(format!("DigitalOcean request failed: {}", e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            InfrastructureError::Transport(format!("Failed to read DigitalOcean response: {}", e))
        })?;

        if !status.is_success() {
            return Err(Self::classify_error(status, path, &body));
        }
        Ok(body)
    }

    fn classify_error(status: StatusCode, path: &str, body: &str) -> InfrastructureError {
        let message = match serde_json::from_str::<DoErrorResponse>(body) {
            Ok(error) => format!("DigitalOcean API error ({}): {}", error.id, error.message),
            Err(_) => format!("DigitalOcean returned status {}", status),
        };
        warn!("{} for {}", message, path);

        match status {
            StatusCode::NOT_FOUND => InfrastructureError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InfrastructureError::Transport(
                "Infrastructure provider rejected the configured credentials".to_string(),
            ),
            StatusCode::TOO_MANY_REQUESTS => InfrastructureError::Transport(message),
            s if s.is_client_error() => InfrastructureError::Rejected(message),
            _ => InfrastructureError::Transport(message),
        }
    }

    fn parse_droplet(body: &str) -> Result<Droplet, InfrastructureError> {
        let envelope: DropletEnvelope = serde_json::from_str(body).map_err(|e| {
            InfrastructureError::Transport(format!("Failed to parse DigitalOcean response: {}", e))
        })?;
        Ok(envelope.droplet.into())
    }
}

#[async_trait]
impl InfrastructureProvider for DigitalOceanClient {
    async fn create_droplet(&self, droplet: &NewDroplet) -> Result<Droplet, InfrastructureError> {
        let body = self
            .api_request(Method::POST, "/droplets", Some(droplet))
            .await?;
        let created = Self::parse_droplet(&body)?;
        info!(
            "Created droplet {} ({}) in {}",
            created.id, droplet.name, droplet.region
        );
        Ok(created)
    }

    async fn get_droplet(&self, droplet_id: &str) -> Result<Droplet, InfrastructureError> {
        let body = self
            .api_request(
                Method::GET,
                &format!("/droplets/{}", droplet_id),
                None::<&()>,
            )
            .await?;
        Self::parse_droplet(&body)
    }

    async fn destroy_droplet(&self, droplet_id: &str) -> Result<(), InfrastructureError> {
        self.api_request(
            Method::DELETE,
            &format!("/droplets/{}", droplet_id),
            None::<&()>,
        )
        .await?;
        info!("Destroyed droplet {}", droplet_id);
        Ok(())
    }
}
