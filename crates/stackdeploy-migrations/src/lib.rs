//! Database migrations for the AI-Stack Deploy backend

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;

/// Transaction-local setting the row-level-security policies read the owner from
pub const CURRENT_USER_SETTING: &str = "app.current_user_id";

/// Value of [`CURRENT_USER_SETTING`] that exposes every owner's rows
pub const SYSTEM_SCOPE_MARKER: &str = "system:all-owners";
