//! # Organization Repository
//!
//! Organizations and their memberships.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::organization::{self, Entity as Organization};
use crate::models::organization_user::{self, Entity as OrganizationUser};
use crate::models::role::{self, Entity as Role};
use crate::models::user::{self, Entity as User};

/// Request data for creating a new organization
#[derive(Debug, Clone)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub description: String,
    pub settings: Option<Value>,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub settings: Option<Value>,
}

/// A membership row joined with its user and role
#[derive(Debug, Clone)]
pub struct Member {
    pub membership: organization_user::Model,
    pub user: user::Model,
    pub role: role::Model,
}

pub struct OrganizationRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> OrganizationRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        request: CreateOrganizationRequest,
    ) -> Result<organization::Model, RepositoryError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(RepositoryError::Validation(
                "organization name cannot be empty".into(),
            ));
        }

        let now = Utc::now();
        organization::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            description: Set(request.description),
            settings: Set(request.settings.unwrap_or_else(|| json!({}))),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        }
        .insert(self.db)
        .await
        .map_err(map_name_conflict)
    }

    /// Live organization by id
    pub async fn find_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<organization::Model>, RepositoryError> {
        Organization::find_by_id(id)
            .filter(organization::Column::DeletedAt.is_null())
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn require(&self, id: Uuid) -> Result<organization::Model, RepositoryError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("organization not found".into()))
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateOrganizationRequest,
    ) -> Result<organization::Model, RepositoryError> {
        let org = self.require(id).await?;
        let mut active = org.into_active_model();
        if let Some(name) = request.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(RepositoryError::Validation(
                    "organization name cannot be empty".into(),
                ));
            }
            active.name = Set(name);
        }
        if let Some(description) = request.description {
            active.description = Set(description);
        }
        if let Some(settings) = request.settings {
            if !settings.is_object() {
                return Err(RepositoryError::Validation(
                    "settings must be a JSON object".into(),
                ));
            }
            active.settings = Set(settings);
        }
        active.updated_at = Set(Utc::now().into());
        active.update(self.db).await.map_err(map_name_conflict)
    }

    /// Soft-delete an organization that has no members left.
    pub async fn delete_if_empty(&self, id: Uuid) -> Result<(), RepositoryError> {
        let org = self.require(id).await?;
        let members = OrganizationUser::find()
            .filter(organization_user::Column::OrganizationId.eq(id))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if members > 0 {
            return Err(RepositoryError::Conflict(
                "organization still has members".into(),
            ));
        }

        let mut active = org.into_active_model();
        let now = Utc::now();
        active.deleted_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    pub async fn membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<organization_user::Model>, RepositoryError> {
        OrganizationUser::find()
            .filter(organization_user::Column::UserId.eq(user_id))
            .filter(organization_user::Column::OrganizationId.eq(organization_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Organizations the user belongs to, with the role held in each.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(organization::Model, role::Model)>, RepositoryError> {
        let memberships = OrganizationUser::find()
            .filter(organization_user::Column::UserId.eq(user_id))
            .order_by_asc(organization_user::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let org_ids: Vec<Uuid> = memberships.iter().map(|m| m.organization_id).collect();
        let orgs: HashMap<Uuid, organization::Model> = Organization::find()
            .filter(organization::Column::Id.is_in(org_ids))
            .filter(organization::Column::DeletedAt.is_null())
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();
        let roles = self.roles_by_id(memberships.iter().map(|m| m.role_id)).await?;

        Ok(memberships
            .into_iter()
            .filter_map(|m| {
                let org = orgs.get(&m.organization_id)?.clone();
                let role = roles.get(&m.role_id)?.clone();
                Some((org, role))
            })
            .collect())
    }

    pub async fn members(&self, organization_id: Uuid) -> Result<Vec<Member>, RepositoryError> {
        let memberships = OrganizationUser::find()
            .filter(organization_user::Column::OrganizationId.eq(organization_id))
            .order_by_asc(organization_user::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<Uuid> = memberships.iter().map(|m| m.user_id).collect();
        let users: HashMap<Uuid, user::Model> = User::find()
            .filter(user::Column::Id.is_in(user_ids))
            .filter(user::Column::DeletedAt.is_null())
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let roles = self.roles_by_id(memberships.iter().map(|m| m.role_id)).await?;

        Ok(memberships
            .into_iter()
            .filter_map(|membership| {
                let user = users.get(&membership.user_id)?.clone();
                let role = roles.get(&membership.role_id)?.clone();
                Some(Member {
                    membership,
                    user,
                    role,
                })
            })
            .collect())
    }

    pub async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<organization_user::Model, RepositoryError> {
        let now = Utc::now();
        organization_user::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            organization_id: Set(organization_id),
            role_id: Set(role_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Conflict("user is already a member of this organization".into())
            } else {
                RepositoryError::database_error(err)
            }
        })
    }

    pub async fn change_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<organization_user::Model, RepositoryError> {
        let membership = self
            .membership(user_id, organization_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("membership not found".into()))?;
        let mut active = membership.into_active_model();
        active.role_id = Set(role_id);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn remove_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let result = OrganizationUser::delete_many()
            .filter(organization_user::Column::UserId.eq(user_id))
            .filter(organization_user::Column::OrganizationId.eq(organization_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound("membership not found".into()));
        }
        Ok(())
    }

    async fn roles_by_id(
        &self,
        ids: impl Iterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, role::Model>, RepositoryError> {
        let ids: Vec<Uuid> = ids.collect();
        Ok(Role::find()
            .filter(role::Column::Id.is_in(ids))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect())
    }
}

fn map_name_conflict(err: sea_orm::DbErr) -> RepositoryError {
    if is_unique_violation(&err) {
        RepositoryError::Conflict("an organization with this name already exists".into())
    } else {
        RepositoryError::database_error(err)
    }
}
