//! Migration runner round trip against the shipped SQL scripts.

use std::fs;

use anyhow::Result;
use nixopus::migration::Migrator;
use sea_orm::{ConnectionTrait, Database, Statement};
use tempfile::TempDir;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::migrations_dir;

async fn table_exists(db: &sea_orm::DatabaseConnection, table: &str) -> Result<bool> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            format!("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{table}'"),
        ))
        .await?;
    Ok(row.is_some())
}

#[tokio::test]
async fn up_down_and_to_round_trip() -> Result<()> {
    let db = Database::connect("sqlite::memory:").await?;
    let migrator = Migrator::from_dir(migrations_dir())?;
    let names: Vec<String> = migrator.migrations().iter().map(|m| m.name.clone()).collect();
    assert_eq!(names.first().map(String::as_str), Some("0001_create_users"));
    assert_eq!(names.last().map(String::as_str), Some("0010_create_feature_flags"));
    assert!(migrator.migrations().windows(2).all(|w| w[0].id < w[1].id));

    let applied = migrator.up(&db).await?;
    assert_eq!(applied, names);
    assert!(migrator.up(&db).await?.is_empty());
    assert!(migrator.status(&db).await?.iter().all(|s| s.applied));
    assert!(table_exists(&db, "feature_flags").await?);

    let rolled_back = migrator.down(&db).await?;
    assert_eq!(rolled_back.as_deref(), Some("0010_create_feature_flags"));
    assert!(!table_exists(&db, "feature_flags").await?);

    let touched = migrator.to(&db, "0006_create_api_keys").await?;
    assert_eq!(
        touched,
        vec![
            "0009_create_audit_logs".to_string(),
            "0008_create_device_grants".to_string(),
            "0007_create_applications".to_string(),
        ]
    );
    assert!(table_exists(&db, "api_keys").await?);
    assert!(!table_exists(&db, "applications").await?);

    let touched = migrator.to(&db, "8").await?;
    assert_eq!(
        touched,
        vec![
            "0007_create_applications".to_string(),
            "0008_create_device_grants".to_string(),
        ]
    );

    let status = migrator.status(&db).await?;
    let pending: Vec<&str> = status
        .iter()
        .filter(|s| !s.applied)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(pending, vec!["0009_create_audit_logs", "0010_create_feature_flags"]);
    Ok(())
}

#[tokio::test]
async fn failed_batch_applies_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("0001_create_widgets_up.sql"),
        "CREATE TABLE widgets (id INTEGER PRIMARY KEY);",
    )?;
    fs::write(dir.path().join("0001_create_widgets_down.sql"), "DROP TABLE widgets;")?;
    fs::write(dir.path().join("0002_broken_up.sql"), "CREATE TABLE oops (;")?;
    fs::write(dir.path().join("0002_broken_down.sql"), "")?;

    let db = Database::connect("sqlite::memory:").await?;
    let migrator = Migrator::from_dir(dir.path())?;
    assert!(migrator.up(&db).await.is_err());

    assert!(!table_exists(&db, "widgets").await?);
    assert!(migrator.status(&db).await?.iter().all(|s| !s.applied));
    Ok(())
}

#[tokio::test]
async fn unknown_target_is_rejected() -> Result<()> {
    let db = Database::connect("sqlite::memory:").await?;
    let migrator = Migrator::from_dir(migrations_dir())?;
    let err = migrator.to(&db, "9999_nope").await.unwrap_err();
    assert!(err.to_string().contains("9999_nope"));
    Ok(())
}
