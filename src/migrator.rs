use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_opname_sessions_table::Migration),
            Box::new(m20240601_000002_create_asset_changes_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_opname_sessions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_opname_sessions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OpnameSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OpnameSessions::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OpnameSessions::SiteId).big_integer().null())
                        .col(ColumnDef::new(OpnameSessions::DeptId).big_integer().null())
                        .col(ColumnDef::new(OpnameSessions::UserId).big_integer().not_null())
                        .col(
                            ColumnDef::new(OpnameSessions::Status)
                                .string_len(16)
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(OpnameSessions::StartedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OpnameSessions::EndedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OpnameSessions::ManagerReviewerId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OpnameSessions::ManagerReviewedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OpnameSessions::L1ReviewerId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OpnameSessions::L1ReviewedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_opname_sessions_status")
                        .table(OpnameSessions::Table)
                        .col(OpnameSessions::Status)
                        .to_owned(),
                )
                .await?;

            // At most one active session per location. Partial indexes are not
            // expressible through the index builder on every backend.
            let conn = manager.get_connection();
            conn.execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_opname_sessions_active_site \
                 ON opname_sessions (site_id) WHERE status = 'active' AND site_id IS NOT NULL",
            )
            .await?;
            conn.execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_opname_sessions_active_dept \
                 ON opname_sessions (dept_id) WHERE status = 'active' AND dept_id IS NOT NULL",
            )
            .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OpnameSessions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum OpnameSessions {
        Table,
        Id,
        SiteId,
        DeptId,
        UserId,
        Status,
        StartedAt,
        EndedAt,
        ManagerReviewerId,
        ManagerReviewedAt,
        #[sea_orm(iden = "l1_reviewer_id")]
        L1ReviewerId,
        #[sea_orm(iden = "l1_reviewed_at")]
        L1ReviewedAt,
    }
}

mod m20240601_000002_create_asset_changes_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_asset_changes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // No foreign key: template sessions (ids 0 and -1) have no session row.
            manager
                .create_table(
                    Table::create()
                        .table(AssetChanges::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssetChanges::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(AssetChanges::SessionId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AssetChanges::AssetTag).string().not_null())
                        .col(ColumnDef::new(AssetChanges::Changes).json().not_null())
                        .col(
                            ColumnDef::new(AssetChanges::ChangeReason)
                                .text()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(AssetChanges::ProcessingStatus)
                                .string_len(16)
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(AssetChanges::ActionNotes).text().null())
                        .col(
                            ColumnDef::new(AssetChanges::ActionNotesBy)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(AssetChanges::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AssetChanges::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_asset_changes_session_tag")
                        .table(AssetChanges::Table)
                        .col(AssetChanges::SessionId)
                        .col(AssetChanges::AssetTag)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssetChanges::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AssetChanges {
        Table,
        Id,
        SessionId,
        AssetTag,
        Changes,
        ChangeReason,
        ProcessingStatus,
        ActionNotes,
        ActionNotesBy,
        CreatedAt,
        UpdatedAt,
    }
}
