use std::collections::HashSet;
use std::path::Path;

use sea_orm_migration::sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, TransactionTrait,
};
use tokio::sync::Mutex;

use crate::source::load_migrations;
use crate::{tracking, MigrationError, MigrationFile};

/// Serializes migration runs within the process.
static MIGRATION_LOCK: Mutex<()> = Mutex::const_new(());

/// Whether a known migration has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub id: i64,
    pub name: String,
    pub applied: bool,
}

/// Applies and rolls back file-based migrations.
#[derive(Debug, Clone)]
pub struct Migrator {
    migrations: Vec<MigrationFile>,
}

impl Migrator {
    pub fn new(mut migrations: Vec<MigrationFile>) -> Self {
        migrations.sort_by_key(|m| m.id);
        Self { migrations }
    }

    /// Loads every `*_up.sql` / `*_down.sql` pair beneath `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        Ok(Self::new(load_migrations(dir)?))
    }

    pub fn migrations(&self) -> &[MigrationFile] {
        &self.migrations
    }

    pub async fn status(
        &self,
        db: &DatabaseConnection,
    ) -> Result<Vec<MigrationStatus>, MigrationError> {
        tracking::ensure_table(db).await?;
        let applied = self.applied_ids(db).await?;

        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                id: m.id,
                name: m.name.clone(),
                applied: applied.contains(&m.id),
            })
            .collect())
    }

    /// Applies every pending migration in a single transaction.
    ///
    /// Returns the names applied, in order. A pending migration whose id is
    /// below the highest applied id is refused rather than applied out of
    /// order, so rollbacks always undo the highest id first.
    pub async fn up(&self, db: &DatabaseConnection) -> Result<Vec<String>, MigrationError> {
        let _guard = MIGRATION_LOCK.lock().await;
        tracking::ensure_table(db).await?;

        let applied = self.applied_ids(db).await?;
        let pending: Vec<&MigrationFile> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.id))
            .collect();

        self.apply_batch(db, &applied, &pending).await
    }

    /// Rolls back the most recently applied migration.
    pub async fn down(&self, db: &DatabaseConnection) -> Result<Option<String>, MigrationError> {
        let _guard = MIGRATION_LOCK.lock().await;
        tracking::ensure_table(db).await?;

        let Some(latest) = tracking::latest(db).await? else {
            tracing::info!("no applied migrations to roll back");
            return Ok(None);
        };

        let migration = self
            .migrations
            .iter()
            .find(|m| m.id == latest.id)
            .ok_or(MigrationError::MissingSource { name: latest.name })?;

        self.roll_back(db, migration).await?;
        Ok(Some(migration.name.clone()))
    }

    /// Moves the schema to `target` (a migration name or numeric id).
    ///
    /// A target that is not yet applied is reached by applying every pending
    /// migration up to and including it in one transaction. An applied target
    /// is reached by rolling back everything above it, one transaction per
    /// migration. Returns the names touched.
    pub async fn to(
        &self,
        db: &DatabaseConnection,
        target: &str,
    ) -> Result<Vec<String>, MigrationError> {
        let target_migration = self
            .migrations
            .iter()
            .find(|m| m.name == target || m.id.to_string() == target)
            .ok_or_else(|| MigrationError::UnknownTarget {
                target: target.to_string(),
            })?;

        let _guard = MIGRATION_LOCK.lock().await;
        tracking::ensure_table(db).await?;
        let applied = self.applied_ids(db).await?;

        if !applied.contains(&target_migration.id) {
            let pending: Vec<&MigrationFile> = self
                .migrations
                .iter()
                .filter(|m| m.id <= target_migration.id && !applied.contains(&m.id))
                .collect();
            return self.apply_batch(db, &applied, &pending).await;
        }

        let mut rolled_back = Vec::new();
        for migration in self
            .migrations
            .iter()
            .rev()
            .filter(|m| m.id > target_migration.id && applied.contains(&m.id))
        {
            self.roll_back(db, migration).await?;
            rolled_back.push(migration.name.clone());
        }
        Ok(rolled_back)
    }

    async fn applied_ids(&self, db: &DatabaseConnection) -> Result<HashSet<i64>, MigrationError> {
        Ok(tracking::applied(db)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect())
    }

    async fn apply_batch(
        &self,
        db: &DatabaseConnection,
        applied: &HashSet<i64>,
        batch: &[&MigrationFile],
    ) -> Result<Vec<String>, MigrationError> {
        if batch.is_empty() {
            tracing::info!("schema is up to date");
            return Ok(Vec::new());
        }

        let highest = self.migrations.iter().rev().find(|m| applied.contains(&m.id));
        if let Some(highest) = highest {
            if let Some(stale) = batch.iter().find(|m| m.id < highest.id) {
                return Err(MigrationError::OutOfOrder {
                    name: stale.name.clone(),
                    applied: highest.name.clone(),
                });
            }
        }

        let txn = db.begin().await?;
        for migration in batch {
            execute_script(&txn, &migration.name, &migration.up_sql).await?;
            tracking::record(&txn, migration)
                .await
                .map_err(|source| MigrationError::Apply {
                    name: migration.name.clone(),
                    source,
                })?;
            tracing::info!(migration = %migration.name, "applied migration");
        }
        txn.commit().await?;

        Ok(batch.iter().map(|m| m.name.clone()).collect())
    }

    async fn roll_back(
        &self,
        db: &DatabaseConnection,
        migration: &MigrationFile,
    ) -> Result<(), MigrationError> {
        if migration.down_sql.trim().is_empty() {
            return Err(MigrationError::MissingDown {
                name: migration.name.clone(),
            });
        }

        let txn = db.begin().await?;
        execute_script(&txn, &migration.name, &migration.down_sql).await?;
        tracking::forget(&txn, migration.id)
            .await
            .map_err(|source| MigrationError::Apply {
                name: migration.name.clone(),
                source,
            })?;
        txn.commit().await?;

        tracing::info!(migration = %migration.name, "rolled back migration");
        Ok(())
    }
}

async fn execute_script(
    txn: &DatabaseTransaction,
    name: &str,
    sql: &str,
) -> Result<(), MigrationError> {
    if sql.trim().is_empty() {
        return Ok(());
    }
    txn.execute_unprepared(sql)
        .await
        .map(|_| ())
        .map_err(|source| MigrationError::Apply {
            name: name.to_string(),
            source,
        })
}
