//! # Application Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::application::{self, Entity as Application};

/// Fields for a new application
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub family_id: Option<Uuid>,
    pub name: String,
    pub repository: String,
    pub branch: String,
    pub base_path: String,
    pub build_pack: String,
    pub environment: String,
    pub environment_variables: Value,
    pub domain: Option<String>,
}

pub struct ApplicationRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> ApplicationRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        id: Uuid,
        new_app: NewApplication,
    ) -> Result<application::Model, RepositoryError> {
        if new_app.name.trim().is_empty() {
            return Err(RepositoryError::Validation("name is required".into()));
        }
        if new_app.repository.trim().is_empty() {
            return Err(RepositoryError::Validation("repository is required".into()));
        }

        let now = Utc::now();
        application::ActiveModel {
            id: Set(id),
            organization_id: Set(new_app.organization_id),
            user_id: Set(new_app.user_id),
            family_id: Set(new_app.family_id),
            name: Set(new_app.name.trim().to_string()),
            repository: Set(new_app.repository.trim().to_string()),
            branch: Set(new_app.branch),
            base_path: Set(new_app.base_path),
            build_pack: Set(new_app.build_pack),
            environment: Set(new_app.environment),
            environment_variables: Set(new_app.environment_variables),
            domain: Set(new_app.domain),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find_in_org(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<application::Model>, RepositoryError> {
        Application::find_by_id(id)
            .filter(application::Column::OrganizationId.eq(organization_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_for_org(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<application::Model>, RepositoryError> {
        Application::find()
            .filter(application::Column::OrganizationId.eq(organization_id))
            .order_by_asc(application::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_family(
        &self,
        organization_id: Uuid,
        family_id: Uuid,
    ) -> Result<Vec<application::Model>, RepositoryError> {
        Application::find()
            .filter(application::Column::OrganizationId.eq(organization_id))
            .filter(application::Column::FamilyId.eq(family_id))
            .order_by_asc(application::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
