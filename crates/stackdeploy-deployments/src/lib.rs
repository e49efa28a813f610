//! Deployment orchestrator: provisions droplets for subscribed templates,
//! tracks their lifecycle and tears them down.

mod digitalocean;
mod error;
mod plugin;
mod poller;
mod provider;
mod service;
pub mod handlers;
pub mod test_utils;

pub use digitalocean::DigitalOceanClient;
pub use error::DeploymentError;
pub use plugin::DeploymentsPlugin;
pub use poller::{PollSummary, StatusPoller};
pub use provider::{
    map_droplet_status, Droplet, InfrastructureError, InfrastructureProvider, NewDroplet,
};
pub use service::{
    find_owned_deployment, DeployedStack, DeploymentService, ProvisionSettings, TeardownSummary,
    TransitionOutcome,
};
