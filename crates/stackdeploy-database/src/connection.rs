//! Database connection management

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use stackdeploy_core::{ServiceError, ServiceResult};
use stackdeploy_migrations::{Migrator, MigratorTrait};
use std::sync::Arc;
use tracing::{debug, info};

pub type DbConnection = DatabaseConnection;

/// Connect and bring the schema up to date.
///
/// An in-memory SQLite database lives inside a single connection, so the pool
/// is pinned to one connection for `sqlite::memory:` URLs.
pub async fn establish_connection(
    database_url: &str,
    max_connections: u32,
) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(database_url);
    if database_url.starts_with("sqlite") && database_url.contains(":memory:") {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(max_connections)
            .min_connections(max_connections.min(5));
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;
    debug!("Database connection established");

    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Migration(e.to_string()))?;
    info!("Database migrations applied");

    Ok(Arc::new(db))
}
