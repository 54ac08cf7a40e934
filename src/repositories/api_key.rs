//! # API Key Repository

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::api_key::{self, Entity as ApiKey};

pub struct ApiKeyRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> ApiKeyRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn insert(&self, model: api_key::ActiveModel) -> Result<api_key::Model, RepositoryError> {
        model
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<api_key::Model>, RepositoryError> {
        ApiKey::find()
            .filter(api_key::Column::KeyHash.eq(key_hash))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<api_key::Model>, RepositoryError> {
        ApiKey::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Keys owned by `user_id` within `organization_id`, newest first
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<api_key::Model>, RepositoryError> {
        ApiKey::find()
            .filter(api_key::Column::UserId.eq(user_id))
            .filter(api_key::Column::OrganizationId.eq(organization_id))
            .order_by_desc(api_key::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Sets `revoked_at` if not already set. Returns whether a row changed.
    pub async fn revoke(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = ApiKey::update_many()
            .col_expr(api_key::Column::RevokedAt, Expr::value(now))
            .col_expr(api_key::Column::UpdatedAt, Expr::value(now))
            .filter(api_key::Column::Id.eq(id))
            .filter(api_key::Column::RevokedAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn touch_last_used(&self, id: Uuid) -> Result<(), RepositoryError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        ApiKey::update_many()
            .col_expr(api_key::Column::LastUsedAt, Expr::value(now))
            .filter(api_key::Column::Id.eq(id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }
}
