//! Core utilities and types shared across all AI-Stack Deploy crates

pub mod error;
pub mod error_builder;
pub mod plugin;
pub mod problemdetails;
pub use problemdetails::ProblemDetails;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use error_builder::*;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;

/// Version reported by `/` and `/health`
pub const API_VERSION: &str = "1.0.0";
