use stackdeploy_core::error_builder::{internal_server_error, not_found};
use stackdeploy_core::problemdetails::Problem;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Tier '{tier}' is not offered for template '{template_id}'")]
    TierNotFound { template_id: String, tier: String },

    #[error("Failed to parse template catalog: {0}")]
    Parse(String),

    #[error("Invalid template catalog: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl From<CatalogError> for Problem {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::TemplateNotFound(_) | CatalogError::TierNotFound { .. } => not_found()
                .title("Plan Not Found")
                .detail(error.to_string())
                .build(),
            CatalogError::Parse(_) | CatalogError::Invalid(_) => {
                tracing::error!("Template catalog error: {}", error);
                internal_server_error()
                    .detail("The template catalog is unavailable")
                    .build()
            }
        }
    }
}
