mod api;
mod shutdown;

use clap::Args;
use stackdeploy_config::{
    DropletDefaults, ServerConfig, DEFAULT_DIGITALOCEAN_API_BASE, DEFAULT_STRIPE_API_BASE,
};
use std::sync::Arc;
use tracing::{debug, info};

pub use api::{build_api, start_api, ApiApplication};
pub use shutdown::shutdown_signal;

#[derive(Args, Debug, Clone)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "0.0.0.0:8000", env = "STACKDEPLOY_ADDRESS")]
    pub address: String,

    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, default_value_t = 20, env = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,

    /// Deployment environment: development, staging or production
    #[arg(long, default_value = "development", env = "ENVIRONMENT")]
    pub environment: String,

    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// HS256 secret used to verify bearer tokens
    #[arg(long, env = "SUPABASE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, default_value = "", env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    pub stripe_secret_key: String,

    #[arg(long, env = "STRIPE_PUBLISHABLE_KEY")]
    pub stripe_publishable_key: Option<String>,

    #[arg(long, default_value = "", env = "STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
    pub stripe_webhook_secret: String,

    #[arg(long, default_value = DEFAULT_STRIPE_API_BASE, env = "STRIPE_API_BASE")]
    pub stripe_api_base: String,

    #[arg(long, default_value = "", env = "DIGITALOCEAN_TOKEN", hide_env_values = true)]
    pub digitalocean_token: String,

    #[arg(long, default_value = DEFAULT_DIGITALOCEAN_API_BASE, env = "DIGITALOCEAN_API_BASE")]
    pub digitalocean_api_base: String,

    /// Shared secret for `X-Signature` on infrastructure webhooks
    #[arg(long, default_value = "", env = "INFRA_WEBHOOK_SECRET", hide_env_values = true)]
    pub infra_webhook_secret: String,

    #[arg(long, default_value = "nyc1", env = "DROPLET_REGION")]
    pub droplet_region: String,

    #[arg(long, default_value = "s-2vcpu-2gb", env = "DROPLET_SIZE")]
    pub droplet_size: String,

    #[arg(long, default_value = "docker-20-04", env = "DROPLET_IMAGE")]
    pub droplet_image: String,

    /// How many times to look for a droplet's public address before giving up
    #[arg(long, default_value_t = 60, env = "PROVISION_WAIT_ATTEMPTS")]
    pub provision_wait_attempts: u32,

    #[arg(long, default_value_t = 5, env = "PROVISION_WAIT_INTERVAL_SECS")]
    pub provision_wait_interval_secs: u64,

    /// Seconds between droplet status polls
    #[arg(long, default_value_t = 30, env = "STATUS_POLL_INTERVAL_SECS")]
    pub status_poll_interval_secs: u64,

    #[arg(long, env = "FRONTEND_URL")]
    pub frontend_url: Option<String>,

    #[arg(long, env = "API_GATEWAY_URL")]
    pub api_gateway_url: Option<String>,

    /// Comma-separated CORS origins
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,
}

impl ServeCommand {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            address: self.address.clone(),
            database_url: self.database_url.clone(),
            database_max_connections: self.database_max_connections,
            environment: self.environment.clone(),
            debug: self.debug,
            supabase_url: self.supabase_url.clone(),
            jwt_secret: self.jwt_secret.clone(),
            stripe_secret_key: self.stripe_secret_key.clone(),
            stripe_publishable_key: self.stripe_publishable_key.clone(),
            stripe_webhook_secret: self.stripe_webhook_secret.clone(),
            stripe_api_base: self.stripe_api_base.clone(),
            digitalocean_token: self.digitalocean_token.clone(),
            digitalocean_api_base: self.digitalocean_api_base.clone(),
            infra_webhook_secret: self.infra_webhook_secret.clone(),
            droplet: DropletDefaults {
                region: self.droplet_region.clone(),
                image: self.droplet_image.clone(),
                size: self.droplet_size.clone(),
            },
            provision_wait_attempts: self.provision_wait_attempts,
            provision_wait_interval_secs: self.provision_wait_interval_secs,
            status_poll_interval_secs: self.status_poll_interval_secs,
            frontend_url: self.frontend_url.clone(),
            api_gateway_url: self.api_gateway_url.clone(),
            allowed_origins: self.allowed_origins.clone(),
        }
    }

    pub fn execute(self) -> anyhow::Result<()> {
        let config = Arc::new(self.server_config());
        info!(
            "Starting StackDeploy API ({}) on {}",
            config.environment, config.address
        );

        debug!("Creating tokio runtime");
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(start_api(config))
    }
}
