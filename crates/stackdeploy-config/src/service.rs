use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
pub const DEFAULT_DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com/v2";
const DEV_FRONTEND_ORIGIN: &str = "http://localhost:3000";

#[derive(Error, Debug)]
pub enum ConfigServiceError {
    #[error("Missing required setting: {key}")]
    MissingSetting { key: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfiguration { details: String },
}

/// Size, region and image used for every provisioned droplet
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DropletDefaults {
    pub region: String,
    pub image: String,
    pub size: String,
}

impl Default for DropletDefaults {
    fn default() -> Self {
        Self {
            region: "nyc1".to_string(),
            image: "docker-20-04".to_string(),
            size: "s-2vcpu-2gb".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub database_url: String,
    pub database_max_connections: u32,

    /// `development`, `staging` or `production`
    pub environment: String,
    pub debug: bool,

    // Identity provider
    pub supabase_url: Option<String>,
    pub jwt_secret: String,

    // Payments provider
    pub stripe_secret_key: String,
    pub stripe_publishable_key: Option<String>,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,

    // Infrastructure provider
    pub digitalocean_token: String,
    pub digitalocean_api_base: String,
    pub infra_webhook_secret: String,
    pub droplet: DropletDefaults,
    pub provision_wait_attempts: u32,
    pub provision_wait_interval_secs: u64,
    pub status_poll_interval_secs: u64,

    // Public surfaces
    pub frontend_url: Option<String>,
    pub api_gateway_url: Option<String>,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8000".to_string(),
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 20,
            environment: "development".to_string(),
            debug: false,
            supabase_url: None,
            jwt_secret: String::new(),
            stripe_secret_key: String::new(),
            stripe_publishable_key: None,
            stripe_webhook_secret: String::new(),
            stripe_api_base: DEFAULT_STRIPE_API_BASE.to_string(),
            digitalocean_token: String::new(),
            digitalocean_api_base: DEFAULT_DIGITALOCEAN_API_BASE.to_string(),
            infra_webhook_secret: String::new(),
            droplet: DropletDefaults::default(),
            provision_wait_attempts: 60,
            provision_wait_interval_secs: 5,
            status_poll_interval_secs: 30,
            frontend_url: None,
            api_gateway_url: None,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Origins the CORS layer accepts
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self
            .allowed_origins
            .iter()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();

        if let Some(frontend) = &self.frontend_url {
            origins.push(frontend.trim_end_matches('/').to_string());
        }
        if !self.is_production() {
            origins.push(DEV_FRONTEND_ORIGIN.to_string());
        }

        origins.sort();
        origins.dedup();
        origins
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }

    pub fn provision_wait_interval(&self) -> Duration {
        Duration::from_secs(self.provision_wait_interval_secs)
    }

    /// Check the settings every environment needs, plus provider credentials in production
    pub fn validate(&self) -> Result<(), ConfigServiceError> {
        require("SUPABASE_JWT_SECRET", &self.jwt_secret)?;

        if self.is_production() {
            require("STRIPE_SECRET_KEY", &self.stripe_secret_key)?;
            require("STRIPE_WEBHOOK_SECRET", &self.stripe_webhook_secret)?;
            require("DIGITALOCEAN_TOKEN", &self.digitalocean_token)?;
            require("INFRA_WEBHOOK_SECRET", &self.infra_webhook_secret)?;
        }

        if self.status_poll_interval_secs == 0 {
            return Err(ConfigServiceError::InvalidConfiguration {
                details: "status poll interval must be at least one second".to_string(),
            });
        }

        for (key, value) in [
            ("STRIPE_API_BASE", &self.stripe_api_base),
            ("DIGITALOCEAN_API_BASE", &self.digitalocean_api_base),
        ] {
            url::Url::parse(value).map_err(|e| ConfigServiceError::InvalidConfiguration {
                details: format!("{} is not a valid URL: {}", key, e),
            })?;
        }

        Ok(())
    }
}

fn require(key: &str, value: &str) -> Result<(), ConfigServiceError> {
    if value.trim().is_empty() {
        return Err(ConfigServiceError::MissingSetting {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Read access to the server configuration for the other plugins
pub struct ConfigService {
    config: Arc<ServerConfig>,
}

impl ConfigService {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub fn get_server_config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            jwt_secret: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_development_adds_localhost_origin() {
        let mut cfg = config();
        cfg.allowed_origins = vec!["https://app.example.com/".to_string(), " ".to_string()];
        assert_eq!(
            cfg.cors_origins(),
            vec![
                "http://localhost:3000".to_string(),
                "https://app.example.com".to_string()
            ]
        );
    }

    #[test]
    fn test_production_origins_exclude_localhost() {
        let mut cfg = config();
        cfg.environment = "production".to_string();
        cfg.frontend_url = Some("https://deploy.example.com".to_string());
        assert_eq!(cfg.cors_origins(), vec!["https://deploy.example.com"]);
    }

    #[test]
    fn test_validate_requires_jwt_secret() {
        let cfg = ServerConfig::default();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigServiceError::MissingSetting { key }) if key == "SUPABASE_JWT_SECRET"
        ));
    }

    #[test]
    fn test_validate_requires_provider_keys_in_production() {
        let mut cfg = config();
        assert!(cfg.validate().is_ok());

        cfg.environment = "production".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigServiceError::MissingSetting { key }) if key == "STRIPE_SECRET_KEY"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut cfg = config();
        cfg.status_poll_interval_secs = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigServiceError::InvalidConfiguration { .. })
        ));
    }
}
