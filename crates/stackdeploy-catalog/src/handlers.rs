use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::{TemplateCatalog, TemplateSummary, TierPricing};

/// Response for listing templates
#[derive(Debug, Serialize, ToSchema)]
pub struct ListTemplatesResponse {
    /// Templates keyed by id
    pub templates: BTreeMap<String, TemplateSummary>,
}

#[derive(OpenApi)]
#[openapi(
    paths(list_templates),
    components(schemas(ListTemplatesResponse, TemplateSummary, TierPricing)),
    tags((name = "Templates", description = "Deployable application stacks and pricing"))
)]
pub struct CatalogApiDoc;

/// List available templates with tier pricing
#[utoipa::path(
    get,
    path = "/templates",
    tag = "Templates",
    responses(
        (status = 200, description = "Template catalog", body = ListTemplatesResponse)
    )
)]
pub async fn list_templates(State(catalog): State<Arc<TemplateCatalog>>) -> impl IntoResponse {
    Json(ListTemplatesResponse {
        templates: catalog.list(),
    })
}

pub fn configure_routes() -> Router<Arc<TemplateCatalog>> {
    Router::new().route("/templates", get(list_templates))
}
