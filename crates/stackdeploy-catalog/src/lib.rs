//! Template catalog: the compiled-in list of deployable application stacks,
//! their tier pricing, the plan selector grammar and cloud-init rendering.

mod catalog;
mod cloud_init;
mod error;
mod plugin;
pub mod handlers;

pub use catalog::{
    PlanSelection, TemplateCatalog, TemplateDefinition, TemplateSummary, TierPricing,
};
pub use cloud_init::render_cloud_init;
pub use error::CatalogError;
pub use plugin::CatalogPlugin;
