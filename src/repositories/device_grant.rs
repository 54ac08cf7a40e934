//! # Device Grant Repository
//!
//! State transitions are conditional updates on the current state so two
//! concurrent callers can never both win the same transition.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::device_grant::{self, Entity as DeviceGrant, GrantState};

pub struct DeviceGrantRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> DeviceGrantRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        grant: device_grant::ActiveModel,
    ) -> Result<device_grant::Model, RepositoryError> {
        grant
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_device_code(
        &self,
        device_code: &str,
    ) -> Result<Option<device_grant::Model>, RepositoryError> {
        DeviceGrant::find_by_id(device_code.to_string())
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<device_grant::Model>, RepositoryError> {
        DeviceGrant::find()
            .filter(device_grant::Column::UserCode.eq(user_code))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn record_poll(
        &self,
        device_code: &str,
        at: DateTimeWithTimeZone,
    ) -> Result<(), RepositoryError> {
        DeviceGrant::update_many()
            .col_expr(device_grant::Column::LastPolledAt, Expr::value(at))
            .filter(device_grant::Column::DeviceCode.eq(device_code))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    /// Move `device_code` from `from` to `to`. Returns false when the grant
    /// was no longer in `from`.
    pub async fn transition(
        &self,
        device_code: &str,
        from: &[GrantState],
        to: GrantState,
        decided: Option<(Uuid, DateTimeWithTimeZone)>,
    ) -> Result<bool, RepositoryError> {
        let mut update = DeviceGrant::update_many()
            .col_expr(device_grant::Column::State, Expr::value(to.as_str()));
        if let Some((user_id, at)) = decided {
            update = update
                .col_expr(device_grant::Column::UserId, Expr::value(user_id))
                .col_expr(device_grant::Column::DecidedAt, Expr::value(at));
        }

        let result = update
            .filter(device_grant::Column::DeviceCode.eq(device_code))
            .filter(device_grant::Column::State.is_in(from.iter().map(|s| s.as_str())))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }

    /// Delete grants that expired before `cutoff`, whatever their state.
    pub async fn purge_expired(
        &self,
        cutoff: DateTimeWithTimeZone,
    ) -> Result<u64, RepositoryError> {
        let result = DeviceGrant::delete_many()
            .filter(device_grant::Column::ExpiresAt.lt(cutoff))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}
