//! SQL-file migrations for the Nixopus control plane.
//!
//! Migrations live on disk as `<id>_<name>_up.sql` / `<id>_<name>_down.sql`
//! pairs. [`Migrator`] loads them, records applied ids in a `migrations`
//! table and moves the schema forward or back inside transactions.

pub use sea_orm_migration::sea_orm;

mod error;
mod runner;
mod source;
mod tracking;

pub use error::MigrationError;
pub use runner::{MigrationStatus, Migrator};
pub use source::{MigrationFile, load_migrations};
