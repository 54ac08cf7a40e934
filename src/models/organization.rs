//! Organization entity model
//!
//! Organizations are the tenancy boundary. The `settings` blob carries
//! per-organization defaults such as the container stop timeout.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub name: String,

    pub description: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub settings: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::organization_user::Entity")]
    OrganizationUsers,
    #[sea_orm(has_many = "super::application::Entity")]
    Applications,
}

impl Related<super::organization_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrganizationUsers.def()
    }
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Applications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Stop timeout applied when a request omits one.
pub const DEFAULT_CONTAINER_STOP_TIMEOUT_SECS: i64 = 10;
/// Log lines returned when a request omits `tail`.
pub const DEFAULT_CONTAINER_LOG_TAIL_LINES: i64 = 100;

impl Model {
    pub fn container_stop_timeout(&self) -> i64 {
        self.settings
            .get("container_stop_timeout")
            .and_then(|v| v.as_i64())
            .filter(|v| *v >= 0)
            .unwrap_or(DEFAULT_CONTAINER_STOP_TIMEOUT_SECS)
    }

    pub fn container_log_tail_lines(&self) -> i64 {
        self.settings
            .get("container_log_tail_lines")
            .and_then(|v| v.as_i64())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_CONTAINER_LOG_TAIL_LINES)
    }
}
