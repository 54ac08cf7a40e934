//! # Role Repository
//!
//! Roles, permissions and the join between them.

use std::collections::HashSet;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::permission::{self, Action, Entity as Permission};
use crate::models::role::{self, Entity as Role};
use crate::models::role_permission::{self, Entity as RolePermission};

pub struct RoleRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> RoleRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<role::Model>, RepositoryError> {
        Role::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<role::Model>, RepositoryError> {
        Role::find()
            .filter(role::Column::Name.eq(name))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Role by name, failing with `NotFound` when the seed is missing.
    pub async fn require_by_name(&self, name: &str) -> Result<role::Model, RepositoryError> {
        self.find_by_name(name)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("role '{name}' not found")))
    }

    pub async fn list(&self) -> Result<Vec<role::Model>, RepositoryError> {
        Role::find()
            .order_by_asc(role::Column::Name)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn create(&self, name: &str, description: &str) -> Result<role::Model, RepositoryError> {
        let now = Utc::now();
        role::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn permissions_for_role(
        &self,
        role_id: Uuid,
    ) -> Result<Vec<permission::Model>, RepositoryError> {
        Permission::find()
            .inner_join(RolePermission)
            .filter(role_permission::Column::RoleId.eq(role_id))
            .order_by_asc(permission::Column::Resource)
            .order_by_asc(permission::Column::Action)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Whether the role grants `action` on `resource`.
    pub async fn has_permission(
        &self,
        role_id: Uuid,
        resource: &str,
        action: Action,
    ) -> Result<bool, RepositoryError> {
        let found = Permission::find()
            .inner_join(RolePermission)
            .filter(role_permission::Column::RoleId.eq(role_id))
            .filter(permission::Column::Resource.eq(resource))
            .filter(permission::Column::Action.eq(action.as_str()))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(found.is_some())
    }

    pub async fn find_or_create_permission(
        &self,
        resource: &str,
        action: Action,
    ) -> Result<permission::Model, RepositoryError> {
        let existing = Permission::find()
            .filter(permission::Column::Resource.eq(resource))
            .filter(permission::Column::Action.eq(action.as_str()))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        permission::ActiveModel {
            id: Set(Uuid::new_v4()),
            resource: Set(resource.to_string()),
            action: Set(action.as_str().to_string()),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Grant a permission, ignoring grants that already exist.
    pub async fn grant(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let existing = RolePermission::find()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .filter(role_permission::Column::PermissionId.eq(permission_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if existing.is_some() {
            return Ok(());
        }

        role_permission::ActiveModel {
            id: Set(Uuid::new_v4()),
            role_id: Set(role_id),
            permission_id: Set(permission_id),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    /// Replace the role's permission set with exactly `grants`.
    pub async fn set_permissions(
        &self,
        role_id: Uuid,
        grants: &[(String, Action)],
    ) -> Result<Vec<permission::Model>, RepositoryError> {
        let mut wanted = HashSet::new();
        for (resource, action) in grants {
            let permission = self.find_or_create_permission(resource, *action).await?;
            wanted.insert(permission.id);
        }

        RolePermission::delete_many()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        for permission_id in wanted {
            self.grant(role_id, permission_id).await?;
        }

        self.permissions_for_role(role_id).await
    }
}
