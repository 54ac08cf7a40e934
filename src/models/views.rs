//! Response views.
//!
//! Entities reference each other by id only; these structs materialize the
//! bounded-depth shapes the API returns. Secrets (password hashes, 2FA
//! secrets, key hashes, reset tokens) never appear here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{api_key, application, audit_log, feature_flag, organization, permission, role, user};

/// Public profile of a user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub user_type: String,
    pub is_verified: bool,
    pub two_factor_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&user::Model> for UserView {
    fn from(m: &user::Model) -> Self {
        Self {
            id: m.id,
            email: m.email.clone(),
            username: m.username.clone(),
            user_type: m.user_type.clone(),
            is_verified: m.is_verified,
            two_factor_enabled: m.two_factor_enabled,
            created_at: m.created_at.with_timezone(&Utc),
            updated_at: m.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct OrganizationView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&organization::Model> for OrganizationView {
    fn from(m: &organization::Model) -> Self {
        Self {
            id: m.id,
            name: m.name.clone(),
            description: m.description.clone(),
            settings: m.settings.clone(),
            created_at: m.created_at.with_timezone(&Utc),
            updated_at: m.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PermissionView {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
}

impl From<&permission::Model> for PermissionView {
    fn from(m: &permission::Model) -> Self {
        Self {
            id: m.id,
            resource: m.resource.clone(),
            action: m.action.clone(),
        }
    }
}

/// Role with its permissions, one level deep
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct RoleView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub permissions: Vec<PermissionView>,
}

impl RoleView {
    pub fn new(role: &role::Model, permissions: &[permission::Model]) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            description: role.description.clone(),
            permissions: permissions.iter().map(PermissionView::from).collect(),
        }
    }
}

/// An organization as seen by one of its members
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct MembershipView {
    pub organization: OrganizationView,
    pub role: RoleView,
}

/// A member of an organization and the role they hold
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct MemberView {
    pub user: UserView,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

/// API key metadata. The display string is returned only at creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ApiKeyView {
    pub id: Uuid,
    pub name: String,
    pub prefix: String,
    pub organization_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&api_key::Model> for ApiKeyView {
    fn from(m: &api_key::Model) -> Self {
        Self {
            id: m.id,
            name: m.name.clone(),
            prefix: m.prefix.clone(),
            organization_id: m.organization_id,
            expires_at: m.expires_at.map(|t| t.with_timezone(&Utc)),
            last_used_at: m.last_used_at.map(|t| t.with_timezone(&Utc)),
            revoked_at: m.revoked_at.map(|t| t.with_timezone(&Utc)),
            created_at: m.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ApplicationView {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub family_id: Option<Uuid>,
    pub name: String,
    pub repository: String,
    pub branch: String,
    pub base_path: String,
    pub build_pack: String,
    pub environment: String,
    #[schema(value_type = Object)]
    pub environment_variables: Value,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&application::Model> for ApplicationView {
    fn from(m: &application::Model) -> Self {
        Self {
            id: m.id,
            organization_id: m.organization_id,
            family_id: m.family_id,
            name: m.name.clone(),
            repository: m.repository.clone(),
            branch: m.branch.clone(),
            base_path: m.base_path.clone(),
            build_pack: m.build_pack.clone(),
            environment: m.environment.clone(),
            environment_variables: m.environment_variables.clone(),
            domain: m.domain.clone(),
            created_at: m.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct AuditLogView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub old_values: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub new_values: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub ip_address: String,
    pub user_agent: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&audit_log::Model> for AuditLogView {
    fn from(m: &audit_log::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            organization_id: m.organization_id,
            action: m.action.clone(),
            resource_type: m.resource_type.clone(),
            resource_id: m.resource_id.clone(),
            old_values: m.old_values.clone(),
            new_values: m.new_values.clone(),
            metadata: m.metadata.clone(),
            ip_address: m.ip_address.clone(),
            user_agent: m.user_agent.clone(),
            request_id: m.request_id.clone(),
            created_at: m.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct FeatureFlagView {
    pub feature_name: String,
    pub is_enabled: bool,
}

impl From<&feature_flag::Model> for FeatureFlagView {
    fn from(m: &feature_flag::Model) -> Self {
        Self {
            feature_name: m.feature_name.clone(),
            is_enabled: m.is_enabled,
        }
    }
}
