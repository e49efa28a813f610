mod handler;
pub mod plugin;
mod service;

pub use handler::{configure_routes, HealthResponse, RootResponse, SystemApiDoc};
pub use plugin::ConfigPlugin;
pub use service::{
    ConfigService, ConfigServiceError, DropletDefaults, ServerConfig,
    DEFAULT_DIGITALOCEAN_API_BASE, DEFAULT_STRIPE_API_BASE,
};
