//! Shared datetime aliases

use chrono::{DateTime, Utc};

/// Database DateTime type used by every entity timestamp column
pub type DBDateTime = DateTime<Utc>;

/// Standard UTC DateTime type used in API responses
///
/// Serializes as ISO 8601 with a `Z` suffix. When exposing it through utoipa,
/// annotate the field with `#[schema(value_type = String, format = DateTime)]`.
pub type UtcDateTime = DateTime<Utc>;
