//! API key entity model
//!
//! Only the SHA-256 of the display string and its 8-character prefix are
//! stored; the display string itself is shown once at creation.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// Organization the key acts within
    pub organization_id: Uuid,

    pub name: String,

    /// Lowercase hex SHA-256 of the display string
    #[sea_orm(unique)]
    pub key_hash: String,

    /// First 8 characters of the random part, for identification in listings
    pub prefix: String,

    pub expires_at: Option<DateTimeWithTimeZone>,

    pub last_used_at: Option<DateTimeWithTimeZone>,

    pub revoked_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTimeWithTimeZone) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Not revoked and not expired at `now`.
    pub fn is_valid(&self, now: DateTimeWithTimeZone) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}
