use async_trait::async_trait;
use serde::Serialize;
use stackdeploy_entities::types::DeploymentStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InfrastructureError {
    /// The provider refused the request (quota, bad slug, invalid image)
    #[error("{0}")]
    Rejected(String),

    #[error("Droplet not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, 5xx or rejected credentials
    #[error("{0}")]
    Transport(String),
}

/// Droplet creation request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewDroplet {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ipv6: bool,
    pub user_data: String,
    pub tags: Vec<String>,
}

/// A droplet as last reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct Droplet {
    pub id: String,
    /// Provider status: `new`, `active`, `off` or `archive`
    pub status: String,
    pub public_ipv4: Option<String>,
}

#[async_trait]
pub trait InfrastructureProvider: Send + Sync {
    async fn create_droplet(&self, droplet: &NewDroplet) -> Result<Droplet, InfrastructureError>;

    async fn get_droplet(&self, droplet_id: &str) -> Result<Droplet, InfrastructureError>;

    async fn destroy_droplet(&self, droplet_id: &str) -> Result<(), InfrastructureError>;
}

/// Deployment status implied by a provider droplet status
pub fn map_droplet_status(status: &str) -> Option<DeploymentStatus> {
    match status {
        "new" => Some(DeploymentStatus::Deploying),
        "active" => Some(DeploymentStatus::Running),
        "off" => Some(DeploymentStatus::Stopped),
        "archive" => Some(DeploymentStatus::Failed),
        _ => None,
    }
}
