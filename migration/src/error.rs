use std::path::PathBuf;

use sea_orm_migration::prelude::DbErr;
use thiserror::Error;

/// Errors raised while loading or executing migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read migrations from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("migration file '{file}' does not start with a numeric id")]
    InvalidId { file: String },
    #[error("migration '{name}' has a down script but no up script")]
    MissingUp { name: String },
    #[error("migrations '{first}' and '{second}' share id {id}")]
    DuplicateId {
        id: i64,
        first: String,
        second: String,
    },
    #[error("migration '{name}' has no down script")]
    MissingDown { name: String },
    #[error("applied migration '{name}' is not present on disk")]
    MissingSource { name: String },
    #[error("pending migration '{name}' is older than applied migration '{applied}'")]
    OutOfOrder { name: String, applied: String },
    #[error("unknown migration target '{target}'")]
    UnknownTarget { target: String },
    #[error("migration '{name}' failed: {source}")]
    Apply { name: String, source: DbErr },
    #[error("migration bookkeeping failed: {0}")]
    Database(#[from] DbErr),
}
