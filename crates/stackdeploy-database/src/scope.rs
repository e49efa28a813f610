//! Owner-scoped transactions
//!
//! On PostgreSQL the row-level-security policies compare each row's owner to
//! the transaction-local setting `app.current_user_id`. Every request-driven
//! query runs inside a transaction opened here so the policy always sees the
//! caller. The system scope sets [`SYSTEM_SCOPE_MARKER`] instead; an unset or
//! empty setting matches no rows. SQLite has no such policies; there the owner
//! filter in each query is the only guard.

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr, Statement,
    TransactionTrait,
};
use tracing::debug;

pub use stackdeploy_migrations::{CURRENT_USER_SETTING, SYSTEM_SCOPE_MARKER};

/// Begin a transaction whose row visibility is limited to `user_id`.
///
/// Rejects an empty id and the system marker, neither of which names an owner.
pub async fn begin_owner_scope(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<DatabaseTransaction, DbErr> {
    if user_id.is_empty() || user_id == SYSTEM_SCOPE_MARKER {
        return Err(DbErr::Custom(format!(
            "'{}' is not a valid owner for a scoped transaction",
            user_id
        )));
    }
    let txn = db.begin().await?;
    set_current_user(&txn, user_id).await?;
    Ok(txn)
}

/// Begin a transaction acting as the system (poller, webhook intake).
pub async fn begin_system_scope(db: &DatabaseConnection) -> Result<DatabaseTransaction, DbErr> {
    let txn = db.begin().await?;
    set_current_user(&txn, SYSTEM_SCOPE_MARKER).await?;
    Ok(txn)
}

async fn set_current_user(txn: &DatabaseTransaction, user_id: &str) -> Result<(), DbErr> {
    if txn.get_database_backend() != DatabaseBackend::Postgres {
        return Ok(());
    }

    debug!("Scoping transaction to owner '{}'", user_id);
    txn.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        format!("SELECT set_config('{}', $1, true)", CURRENT_USER_SETTING),
        [user_id.into()],
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_owner_scope_is_a_plain_transaction_on_sqlite() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;
        test_db.seed_user("user-1", "a@example.com").await?;

        let txn = begin_owner_scope(&test_db.db, "user-1").await?;
        let row = txn
            .query_one(Statement::from_string(
                txn.get_database_backend(),
                "SELECT count(*) AS n FROM user_profiles",
            ))
            .await?
            .expect("count row");
        let n: i64 = row.try_get("", "n")?;
        txn.commit().await?;

        assert_eq!(n, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_owner_scope_rejects_system_marker_and_empty_id() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;

        for user_id in ["", SYSTEM_SCOPE_MARKER] {
            let result = begin_owner_scope(&test_db.db, user_id).await;
            assert!(matches!(result, Err(DbErr::Custom(_))), "accepted '{}'", user_id);
        }

        let txn = begin_system_scope(&test_db.db).await?;
        txn.commit().await?;
        Ok(())
    }
}
