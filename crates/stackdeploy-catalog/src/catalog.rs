use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use stackdeploy_entities::types::Tier;
use tracing::debug;
use utoipa::ToSchema;

use crate::CatalogError;

/// Bundled catalog (embedded at compile time)
const BUNDLED_TEMPLATES: &str = include_str!("../templates.yaml");

/// One deployable stack as declared in `templates.yaml`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TemplateDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Port the stack's entry point listens on
    pub port: u16,
    /// Monthly price in USD cents per tier
    pub prices: BTreeMap<Tier, i64>,
    /// docker-compose document started on the droplet
    pub compose: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    tier_features: BTreeMap<Tier, Vec<String>>,
    templates: Vec<TemplateDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TierPricing {
    /// Monthly price in USD cents
    pub price: i64,
    pub features: Vec<String>,
}

/// Public view of a template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TemplateSummary {
    pub name: String,
    pub description: String,
    pub features: Vec<String>,
    pub port: u16,
    /// Keyed by tier (`basic`, `pro`, `enterprise`)
    pub pricing: BTreeMap<String, TierPricing>,
}

/// A resolved `<template-id>[-<tier>]` selector
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSelection {
    pub template_id: String,
    pub template_name: String,
    pub tier: Tier,
    /// Whether the selector named the tier or it defaulted to basic
    pub tier_explicit: bool,
    /// Monthly price in USD cents
    pub unit_amount: i64,
    pub port: u16,
}

impl PlanSelection {
    /// Canonical `<template>-<tier>` form stored on subscriptions
    pub fn plan_type(&self) -> String {
        format!("{}-{}", self.template_id, self.tier)
    }

    /// Product name shown on invoices
    pub fn product_name(&self) -> String {
        format!("{} - {}", self.template_name, self.tier.title())
    }
}

/// Immutable registry of templates, loaded once at startup
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<TemplateDefinition>,
    tier_features: BTreeMap<Tier, Vec<String>>,
}

impl TemplateCatalog {
    /// The catalog shipped with the binary
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_yaml(BUNDLED_TEMPLATES)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_yaml::from_str(yaml).map_err(|e| CatalogError::Parse(e.to_string()))?;
        let catalog = Self {
            templates: file.templates,
            tier_features: file.tier_features,
        };

        let errors = catalog.validate();
        if !errors.is_empty() {
            return Err(CatalogError::Invalid(errors));
        }

        debug!("Loaded {} templates", catalog.templates.len());
        Ok(catalog)
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        if self.templates.is_empty() {
            errors.push("catalog has no templates".to_string());
        }

        for template in &self.templates {
            if template.id.is_empty()
                || !template
                    .id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                errors.push(format!("invalid template id '{}'", template.id));
            }
            if !seen.insert(template.id.as_str()) {
                errors.push(format!("duplicate template id '{}'", template.id));
            }
            if template.port == 0 {
                errors.push(format!("template '{}' has no port", template.id));
            }
            if template.compose.trim().is_empty() {
                errors.push(format!("template '{}' has no compose file", template.id));
            }
            if template.compose.lines().any(|l| l.trim() == "EOF") {
                errors.push(format!(
                    "template '{}' compose file contains a bare EOF line",
                    template.id
                ));
            }
            for tier in Tier::ALL {
                match template.prices.get(&tier) {
                    Some(price) if *price > 0 => {}
                    Some(price) => errors.push(format!(
                        "template '{}' tier {} has non-positive price {}",
                        template.id, tier, price
                    )),
                    None => errors.push(format!(
                        "template '{}' has no price for tier {}",
                        template.id, tier
                    )),
                }
            }
        }

        errors
    }

    pub fn get(&self, template_id: &str) -> Option<&TemplateDefinition> {
        self.templates.iter().find(|t| t.id == template_id)
    }

    pub fn template_ids(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|t| t.id.as_str())
    }

    /// All templates keyed by id
    pub fn list(&self) -> BTreeMap<String, TemplateSummary> {
        self.templates
            .iter()
            .map(|t| (t.id.clone(), self.summarize(t)))
            .collect()
    }

    fn summarize(&self, template: &TemplateDefinition) -> TemplateSummary {
        let pricing = template
            .prices
            .iter()
            .map(|(tier, price)| {
                (
                    tier.to_string(),
                    TierPricing {
                        price: *price,
                        features: self.tier_features.get(tier).cloned().unwrap_or_default(),
                    },
                )
            })
            .collect();

        TemplateSummary {
            name: template.name.clone(),
            description: template.description.clone(),
            features: template.features.clone(),
            port: template.port,
            pricing,
        }
    }

    /// Resolve a `<template-id>[-<tier>]` selector.
    ///
    /// Template ids contain hyphens, so an exact id match wins; otherwise the
    /// longest id followed by `-<tier>` is taken.
    pub fn resolve_plan(&self, selector: &str) -> Result<PlanSelection, CatalogError> {
        let selector = selector.trim().to_ascii_lowercase();

        if let Some(template) = self.get(&selector) {
            return self.selection(template, Tier::Basic, false);
        }

        let template = self
            .templates
            .iter()
            .filter(|t| {
                selector.len() > t.id.len() + 1
                    && selector.starts_with(t.id.as_str())
                    && selector.as_bytes()[t.id.len()] == b'-'
            })
            .max_by_key(|t| t.id.len())
            .ok_or_else(|| CatalogError::TemplateNotFound(selector.clone()))?;

        let tier_name = &selector[template.id.len() + 1..];
        let tier = Tier::from_str(tier_name).ok_or_else(|| CatalogError::TierNotFound {
            template_id: template.id.clone(),
            tier: tier_name.to_string(),
        })?;

        self.selection(template, tier, true)
    }

    fn selection(
        &self,
        template: &TemplateDefinition,
        tier: Tier,
        tier_explicit: bool,
    ) -> Result<PlanSelection, CatalogError> {
        let unit_amount =
            *template
                .prices
                .get(&tier)
                .ok_or_else(|| CatalogError::TierNotFound {
                    template_id: template.id.clone(),
                    tier: tier.to_string(),
                })?;

        Ok(PlanSelection {
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            tier,
            tier_explicit,
            unit_amount,
            port: template.port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::bundled().expect("bundled catalog parses")
    }

    #[test]
    fn test_bundled_catalog_contents() {
        let catalog = catalog();
        let ids: Vec<_> = catalog.template_ids().collect();
        assert_eq!(
            ids,
            vec!["ollama-webui", "rag-app", "ai-agent", "notary-assistant"]
        );

        let notary = catalog.get("notary-assistant").unwrap();
        assert_eq!(notary.port, 8080);
        assert_eq!(notary.prices[&Tier::Basic], 2500);
    }

    #[test]
    fn test_every_tier_price_is_positive() {
        for (id, summary) in catalog().list() {
            assert_eq!(summary.pricing.len(), 3, "{} lacks a tier", id);
            for (tier, pricing) in summary.pricing {
                assert!(pricing.price > 0, "{} {} has price {}", id, tier, pricing.price);
                assert!(!pricing.features.is_empty());
            }
        }
    }

    #[test]
    fn test_resolve_plan_defaults_to_basic() {
        let plan = catalog().resolve_plan("rag-app").unwrap();
        assert_eq!(plan.template_id, "rag-app");
        assert_eq!(plan.tier, Tier::Basic);
        assert!(!plan.tier_explicit);
        assert_eq!(plan.plan_type(), "rag-app-basic");
    }

    #[test]
    fn test_resolve_plan_with_hyphenated_template() {
        let plan = catalog().resolve_plan("notary-assistant-pro").unwrap();
        assert_eq!(plan.template_id, "notary-assistant");
        assert_eq!(plan.tier, Tier::Pro);
        assert!(plan.tier_explicit);
        assert_eq!(plan.unit_amount, 6000);
        assert_eq!(plan.product_name(), "Notary Assistant - Pro");
    }

    #[test]
    fn test_resolve_plan_unknown_tier() {
        assert_eq!(
            catalog().resolve_plan("ai-agent-platinum"),
            Err(CatalogError::TierNotFound {
                template_id: "ai-agent".to_string(),
                tier: "platinum".to_string(),
            })
        );
    }

    #[test]
    fn test_resolve_plan_unknown_template() {
        assert!(matches!(
            catalog().resolve_plan("ai"),
            Err(CatalogError::TemplateNotFound(_))
        ));
        assert!(matches!(
            catalog().resolve_plan("ollama-"),
            Err(CatalogError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_catalog_with_missing_tier() {
        let yaml = r#"
version: "1"
tier_features:
  basic: [Manual updates]
templates:
  - id: tiny
    name: Tiny
    description: Too small
    port: 80
    prices:
      basic: 100
    compose: "services: {}"
"#;
        match TemplateCatalog::from_yaml(yaml) {
            Err(CatalogError::Invalid(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("tier pro"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
