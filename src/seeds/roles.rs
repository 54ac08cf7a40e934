//! Role and permission seeding
//!
//! Creates the `admin`, `member` and `viewer` roles and their default
//! permission sets if they do not already exist. Existing grants are never
//! removed, so edits made by administrators survive restarts.

use anyhow::Result;
use sea_orm::DatabaseConnection;

use crate::models::permission::Action;
use crate::repositories::RoleRepository;

pub const ADMIN_ROLE: &str = "admin";
pub const MEMBER_ROLE: &str = "member";
pub const VIEWER_ROLE: &str = "viewer";

/// Every resource a permission can be granted on
pub const RESOURCES: &[&str] = &[
    "api_key",
    "application",
    "audit",
    "container",
    "feature_flag",
    "organization",
    "role",
    "user",
];

/// Resources members may mutate; they read everything else
const MEMBER_WRITABLE: &[&str] = &["api_key", "application", "container"];

struct RoleSeed {
    name: &'static str,
    description: &'static str,
    grants: fn(&str) -> &'static [Action],
}

fn admin_grants(_resource: &str) -> &'static [Action] {
    &Action::ALL
}

fn member_grants(resource: &str) -> &'static [Action] {
    if MEMBER_WRITABLE.contains(&resource) {
        &Action::ALL
    } else {
        &[Action::Read]
    }
}

fn viewer_grants(_resource: &str) -> &'static [Action] {
    &[Action::Read]
}

/// Seeds the roles table and default grants
pub async fn seed_roles(db: &DatabaseConnection) -> Result<()> {
    let repo = RoleRepository::new(db);
    let seeds = [
        RoleSeed {
            name: ADMIN_ROLE,
            description: "Full access to the organization",
            grants: admin_grants,
        },
        RoleSeed {
            name: MEMBER_ROLE,
            description: "Deploys and operates applications",
            grants: member_grants,
        },
        RoleSeed {
            name: VIEWER_ROLE,
            description: "Read-only access",
            grants: viewer_grants,
        },
    ];

    for seed in seeds {
        if repo.find_by_name(seed.name).await?.is_some() {
            log::info!("Role '{}' already exists, skipping", seed.name);
            continue;
        }

        log::info!("Creating role: {}", seed.name);
        let role = repo.create(seed.name, seed.description).await?;
        for resource in RESOURCES {
            for action in (seed.grants)(resource) {
                let permission = repo.find_or_create_permission(resource, *action).await?;
                repo.grant(role.id, permission.id).await?;
            }
        }
    }

    Ok(())
}
