//! # Feature Flag Repository
//!
//! A feature with no row for an organization is enabled.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::feature_flag::{self, Entity as FeatureFlag};

/// Features every organization lists; each is seeded enabled when absent.
pub const DEFAULT_FEATURES: &[&str] = &[
    "audit",
    "container",
    "deploy",
    "domain",
    "file_manager",
    "github_connector",
    "monitoring",
    "notifications",
    "terminal",
];

pub struct FeatureFlagRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> FeatureFlagRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        organization_id: Uuid,
        feature_name: &str,
    ) -> Result<Option<feature_flag::Model>, RepositoryError> {
        FeatureFlag::find()
            .filter(feature_flag::Column::OrganizationId.eq(organization_id))
            .filter(feature_flag::Column::FeatureName.eq(feature_name))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn is_enabled(
        &self,
        organization_id: Uuid,
        feature_name: &str,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .find(organization_id, feature_name)
            .await?
            .is_none_or(|flag| flag.is_enabled))
    }

    /// All flags for the organization, with any missing default seeded as
    /// enabled. Seeding is per feature, so toggled flags and concurrent
    /// first reads never collide.
    pub async fn list_for_org(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<feature_flag::Model>, RepositoryError> {
        let existing = self.load(organization_id).await?;
        let missing: Vec<&str> = DEFAULT_FEATURES
            .iter()
            .copied()
            .filter(|feature| !existing.iter().any(|flag| flag.feature_name == *feature))
            .collect();
        if missing.is_empty() {
            return Ok(existing);
        }

        for feature in missing {
            self.upsert(organization_id, feature, true, false).await?;
        }
        self.load(organization_id).await
    }

    pub async fn set(
        &self,
        organization_id: Uuid,
        feature_name: &str,
        enabled: bool,
    ) -> Result<feature_flag::Model, RepositoryError> {
        let feature_name = feature_name.trim();
        if feature_name.is_empty() {
            return Err(RepositoryError::Validation("feature_name is required".into()));
        }

        self.upsert(organization_id, feature_name, enabled, true)
            .await?;
        self.find(organization_id, feature_name)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(feature_name.to_string()))
    }

    async fn load(&self, organization_id: Uuid) -> Result<Vec<feature_flag::Model>, RepositoryError> {
        FeatureFlag::find()
            .filter(feature_flag::Column::OrganizationId.eq(organization_id))
            .order_by_asc(feature_flag::Column::FeatureName)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Insert the flag; an existing row is overwritten only when `overwrite`.
    async fn upsert(
        &self,
        organization_id: Uuid,
        feature_name: &str,
        enabled: bool,
        overwrite: bool,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let row = feature_flag::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(organization_id),
            feature_name: Set(feature_name.to_string()),
            is_enabled: Set(enabled),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let mut on_conflict = OnConflict::columns([
            feature_flag::Column::OrganizationId,
            feature_flag::Column::FeatureName,
        ]);
        if overwrite {
            on_conflict.update_columns([
                feature_flag::Column::IsEnabled,
                feature_flag::Column::UpdatedAt,
            ]);
        } else {
            on_conflict.do_nothing();
        }

        FeatureFlag::insert(row)
            .on_conflict(on_conflict)
            .exec_without_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }
}
