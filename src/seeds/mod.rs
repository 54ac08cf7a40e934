//! Database seeding functionality
//!
//! Seeds run at startup after migrations and are idempotent.

pub mod roles;

pub use roles::{ADMIN_ROLE, MEMBER_ROLE, RESOURCES, VIEWER_ROLE, seed_roles};
