//! Initial schema: user_profiles, subscriptions, deployments, update_history
//!
//! Foreign keys are declared inline with the table so the same migration runs
//! on SQLite, which cannot add constraints to an existing table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserProfiles::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserProfiles::Email).string().not_null())
                    .col(ColumnDef::new(UserProfiles::FullName).string().null())
                    .col(
                        ColumnDef::new(UserProfiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserProfiles::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subscriptions::UserId).string().not_null())
                    .col(ColumnDef::new(Subscriptions::UserEmail).string().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::StripeCustomerId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::StripeSubscriptionId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Subscriptions::PlanType).string().not_null())
                    .col(ColumnDef::new(Subscriptions::TemplateId).string().not_null())
                    .col(ColumnDef::new(Subscriptions::Tier).string().not_null())
                    .col(ColumnDef::new(Subscriptions::Status).string().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_user")
                            .from(Subscriptions::Table, Subscriptions::UserId)
                            .to(UserProfiles::Table, UserProfiles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Deployments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deployments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Deployments::UserId).string().not_null())
                    .col(ColumnDef::new(Deployments::UserEmail).string().not_null())
                    .col(ColumnDef::new(Deployments::TemplateId).string().not_null())
                    .col(ColumnDef::new(Deployments::Tier).string().not_null())
                    .col(ColumnDef::new(Deployments::DropletId).string().not_null())
                    .col(ColumnDef::new(Deployments::Url).string().not_null())
                    .col(
                        ColumnDef::new(Deployments::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Deployments::SubscriptionId).uuid().null())
                    .col(
                        ColumnDef::new(Deployments::AutoUpdateEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Deployments::UpdateSchedule)
                            .string()
                            .not_null()
                            .default("manual"),
                    )
                    .col(
                        ColumnDef::new(Deployments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deployments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deployments_user")
                            .from(Deployments::Table, Deployments::UserId)
                            .to(UserProfiles::Table, UserProfiles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deployments_subscription")
                            .from(Deployments::Table, Deployments::SubscriptionId)
                            .to(Subscriptions::Table, Subscriptions::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UpdateHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UpdateHistory::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UpdateHistory::DeploymentId).uuid().not_null())
                    .col(ColumnDef::new(UpdateHistory::UserId).string().not_null())
                    .col(ColumnDef::new(UpdateHistory::Event).string().not_null())
                    .col(ColumnDef::new(UpdateHistory::Details).json().not_null())
                    .col(
                        ColumnDef::new(UpdateHistory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_update_history_deployment")
                            .from(UpdateHistory::Table, UpdateHistory::DeploymentId)
                            .to(Deployments::Table, Deployments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_user_created")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::UserId)
                    .col(Subscriptions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployments_user_created")
                    .table(Deployments::Table)
                    .col(Deployments::UserId)
                    .col(Deployments::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Poller scans by status
        manager
            .create_index(
                Index::create()
                    .name("idx_deployments_status")
                    .table(Deployments::Table)
                    .col(Deployments::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployments_droplet_id")
                    .table(Deployments::Table)
                    .col(Deployments::DropletId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_update_history_deployment")
                    .table(UpdateHistory::Table)
                    .col(UpdateHistory::DeploymentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UpdateHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deployments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserProfiles::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum UserProfiles {
    Table,
    Id,
    Email,
    FullName,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    UserId,
    UserEmail,
    StripeCustomerId,
    StripeSubscriptionId,
    PlanType,
    TemplateId,
    Tier,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Deployments {
    Table,
    Id,
    UserId,
    UserEmail,
    TemplateId,
    Tier,
    DropletId,
    Url,
    Status,
    SubscriptionId,
    AutoUpdateEnabled,
    UpdateSchedule,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum UpdateHistory {
    Table,
    Id,
    DeploymentId,
    UserId,
    Event,
    Details,
    CreatedAt,
}
