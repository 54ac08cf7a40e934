//! # Data Models
//!
//! SeaORM entities for the control plane tables plus the view types
//! returned by the HTTP surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod api_key;
pub mod application;
pub mod audit_log;
pub mod device_grant;
pub mod feature_flag;
pub mod organization;
pub mod organization_user;
pub mod permission;
pub mod refresh_token;
pub mod role;
pub mod role_permission;
pub mod user;
pub mod views;

pub use api_key::Entity as ApiKey;
pub use application::Entity as Application;
pub use audit_log::Entity as AuditLog;
pub use device_grant::Entity as DeviceGrant;
pub use feature_flag::Entity as FeatureFlag;
pub use organization::Entity as Organization;
pub use organization_user::Entity as OrganizationUser;
pub use permission::Entity as Permission;
pub use refresh_token::Entity as RefreshToken;
pub use role::Entity as Role;
pub use role_permission::Entity as RolePermission;
pub use user::Entity as User;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "nixopus-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
