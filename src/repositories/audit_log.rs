//! # Audit Log Repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::audit_log::{self, Entity as AuditLog};

pub struct AuditLogRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> AuditLogRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        entry: audit_log::ActiveModel,
    ) -> Result<audit_log::Model, RepositoryError> {
        entry
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// One page of an organization's entries, newest first, plus the total.
    ///
    /// `page` is 1-based.
    pub async fn list_for_org(
        &self,
        organization_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<audit_log::Model>, u64), RepositoryError> {
        let base = AuditLog::find().filter(audit_log::Column::OrganizationId.eq(organization_id));
        let total = base
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let page_size = page_size.max(1);
        let entries = base
            .order_by_desc(audit_log::Column::CreatedAt)
            .order_by_desc(audit_log::Column::Id)
            .offset(page.saturating_sub(1) * page_size)
            .limit(page_size)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok((entries, total))
    }
}
