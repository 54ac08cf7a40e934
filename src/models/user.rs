//! User entity model

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Platform account. Rows are soft-deleted through `deleted_at`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Login identifier, unique across the platform
    #[sea_orm(unique)]
    pub email: String,

    pub username: String,

    /// Argon2id PHC string
    pub password_hash: String,

    /// One of `admin`, `member`, `viewer`
    pub user_type: String,

    pub is_verified: bool,

    pub two_factor_enabled: bool,

    /// Base64 AES-GCM ciphertext of the TOTP secret
    pub two_factor_secret: Option<String>,

    /// SHA-256 of the outstanding password-reset token
    pub reset_token_hash: Option<String>,

    pub reset_token_expires_at: Option<DateTimeWithTimeZone>,

    /// SHA-256 of the outstanding email-verification token
    pub verification_token_hash: Option<String>,

    pub verification_token_expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::organization_user::Entity")]
    OrganizationUsers,
    #[sea_orm(has_many = "super::refresh_token::Entity")]
    RefreshTokens,
    #[sea_orm(has_many = "super::api_key::Entity")]
    ApiKeys,
}

impl Related<super::organization_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrganizationUsers.def()
    }
}

impl Related<super::refresh_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefreshTokens.def()
    }
}

impl Related<super::api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiKeys.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Platform-level account type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    Member,
    Viewer,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::Member => "member",
            UserType::Viewer => "viewer",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserType::Admin),
            "member" => Ok(UserType::Member),
            "viewer" => Ok(UserType::Viewer),
            other => Err(format!("unknown user type '{other}'")),
        }
    }
}
