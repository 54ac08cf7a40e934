//! The `migrations` bookkeeping table.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DatabaseConnection};

use crate::MigrationFile;

#[derive(DeriveIden)]
enum Migrations {
    Table,
    Id,
    Name,
    AppliedAt,
}

/// A row of the `migrations` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppliedMigration {
    pub id: i64,
    pub name: String,
}

pub(crate) async fn ensure_table(db: &DatabaseConnection) -> Result<(), DbErr> {
    SchemaManager::new(db)
        .create_table(
            Table::create()
                .table(Migrations::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Migrations::Id)
                        .big_integer()
                        .not_null()
                        .primary_key(),
                )
                .col(ColumnDef::new(Migrations::Name).string().not_null())
                .col(
                    ColumnDef::new(Migrations::AppliedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_owned(),
        )
        .await
}

/// Applied rows ordered by id.
pub(crate) async fn applied<C: ConnectionTrait>(db: &C) -> Result<Vec<AppliedMigration>, DbErr> {
    let stmt = Query::select()
        .columns([Migrations::Id, Migrations::Name])
        .from(Migrations::Table)
        .order_by(Migrations::Id, Order::Asc)
        .to_owned();
    let rows = db.query_all(db.get_database_backend().build(&stmt)).await?;

    rows.into_iter()
        .map(|row| {
            Ok(AppliedMigration {
                id: row.try_get("", "id")?,
                name: row.try_get("", "name")?,
            })
        })
        .collect()
}

/// The applied row with the highest id. Migrations are applied in id order,
/// so this is also the most recent one.
pub(crate) async fn latest<C: ConnectionTrait>(db: &C) -> Result<Option<AppliedMigration>, DbErr> {
    let stmt = Query::select()
        .columns([Migrations::Id, Migrations::Name])
        .from(Migrations::Table)
        .order_by(Migrations::Id, Order::Desc)
        .limit(1)
        .to_owned();
    let row = db.query_one(db.get_database_backend().build(&stmt)).await?;

    row.map(|row| {
        Ok(AppliedMigration {
            id: row.try_get("", "id")?,
            name: row.try_get("", "name")?,
        })
    })
    .transpose()
}

pub(crate) async fn record<C: ConnectionTrait>(db: &C, migration: &MigrationFile) -> Result<(), DbErr> {
    let stmt = Query::insert()
        .into_table(Migrations::Table)
        .columns([Migrations::Id, Migrations::Name])
        .values([migration.id.into(), migration.name.clone().into()])
        .map_err(|err| DbErr::Custom(err.to_string()))?
        .to_owned();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}

pub(crate) async fn forget<C: ConnectionTrait>(db: &C, id: i64) -> Result<(), DbErr> {
    let stmt = Query::delete()
        .from_table(Migrations::Table)
        .and_where(Expr::col(Migrations::Id).eq(id))
        .to_owned();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}
