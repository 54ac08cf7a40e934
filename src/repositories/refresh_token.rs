//! # Refresh Token Repository

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::refresh_token::{self, Entity as RefreshToken};

pub struct RefreshTokenRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> RefreshTokenRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Issue a new opaque token for `user_id`.
    pub async fn issue(
        &self,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<refresh_token::Model, RepositoryError> {
        let now = Utc::now();
        refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token: Set(Uuid::new_v4().to_string()),
            expires_at: Set((now + ttl).into()),
            revoked_at: Set(None),
            created_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<refresh_token::Model>, RepositoryError> {
        RefreshToken::find()
            .filter(refresh_token::Column::Token.eq(token))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Revoke `id` only if it is still unrevoked. Returns whether this call
    /// performed the revocation.
    pub async fn revoke_if_live(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
        let result = RefreshToken::update_many()
            .col_expr(refresh_token::Column::RevokedAt, Expr::value(now))
            .filter(refresh_token::Column::Id.eq(id))
            .filter(refresh_token::Column::RevokedAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
        let result = RefreshToken::update_many()
            .col_expr(refresh_token::Column::RevokedAt, Expr::value(now))
            .filter(refresh_token::Column::UserId.eq(user_id))
            .filter(refresh_token::Column::RevokedAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}
