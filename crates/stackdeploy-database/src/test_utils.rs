//! Test utilities for database-backed tests
//!
//! Every test gets its own migrated in-memory SQLite database, so tests can
//! run in parallel without sharing state.

use crate::DbConnection;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use sea_orm_migration::MigratorTrait;
use stackdeploy_entities::user_profiles;
use stackdeploy_migrations::Migrator;
use std::sync::Arc;

pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    /// Create a fresh, migrated in-memory database
    pub async fn new() -> anyhow::Result<Self> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let db = Database::connect(options).await?;
        Migrator::up(&db, None).await?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a user profile row
    pub async fn seed_user(
        &self,
        user_id: &str,
        email: &str,
    ) -> anyhow::Result<user_profiles::Model> {
        let profile = user_profiles::ActiveModel {
            id: Set(user_id.to_string()),
            email: Set(email.to_string()),
            full_name: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(profile)
    }
}
