//! Row-level security on PostgreSQL
//!
//! Every owned table only exposes rows whose owner equals the transaction
//! setting `app.current_user_id`. The system scope (status poller, webhook
//! intake) sets it to the system marker and sees all rows; an unset or empty
//! setting sees nothing. Other backends skip this migration; owner filtering
//! still happens in the scoped queries.

use sea_orm::DatabaseBackend;
use sea_orm_migration::prelude::*;

use crate::{CURRENT_USER_SETTING, SYSTEM_SCOPE_MARKER};

const OWNED_TABLES: [(&str, &str); 4] = [
    ("user_profiles", "id"),
    ("subscriptions", "user_id"),
    ("deployments", "user_id"),
    ("update_history", "user_id"),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::Postgres {
            return Ok(());
        }

        let db = manager.get_connection();
        for (table, owner_column) in OWNED_TABLES {
            db.execute_unprepared(&format!(
                r#"
                ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;
                ALTER TABLE {table} FORCE ROW LEVEL SECURITY;
                CREATE POLICY {table}_owner ON {table}
                    USING (
                        current_setting('{setting}', true) = '{system}'
                        OR {owner_column} = nullif(current_setting('{setting}', true), '')
                    )
                    WITH CHECK (
                        current_setting('{setting}', true) = '{system}'
                        OR {owner_column} = nullif(current_setting('{setting}', true), '')
                    );
                "#,
                setting = CURRENT_USER_SETTING,
                system = SYSTEM_SCOPE_MARKER,
            ))
            .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::Postgres {
            return Ok(());
        }

        let db = manager.get_connection();
        for (table, _) in OWNED_TABLES {
            db.execute_unprepared(&format!(
                r#"
                DROP POLICY IF EXISTS {table}_owner ON {table};
                ALTER TABLE {table} NO FORCE ROW LEVEL SECURITY;
                ALTER TABLE {table} DISABLE ROW LEVEL SECURITY;
                "#
            ))
            .await?;
        }

        Ok(())
    }
}
