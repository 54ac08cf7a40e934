//! # User Repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::user::{self, Entity as User, UserType};

/// Fields required to create an account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub user_type: UserType,
}

/// Repository for User database operations
pub struct UserRepository<'a, C = DatabaseConnection> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> UserRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Create a user. Emails are stored lowercased.
    pub async fn create(&self, new_user: NewUser) -> Result<user::Model, RepositoryError> {
        let email = normalize_email(&new_user.email);
        if email.is_empty() || !email.contains('@') {
            return Err(RepositoryError::Validation("invalid email address".into()));
        }

        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            username: Set(new_user.username),
            password_hash: Set(new_user.password_hash),
            user_type: Set(new_user.user_type.as_str().to_string()),
            is_verified: Set(false),
            two_factor_enabled: Set(false),
            two_factor_secret: Set(None),
            reset_token_hash: Set(None),
            reset_token_expires_at: Set(None),
            verification_token_hash: Set(None),
            verification_token_expires_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };

        model.insert(self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Conflict("a user with this email already exists".into())
            } else {
                RepositoryError::database_error(err)
            }
        })
    }

    /// Live (not soft-deleted) user by id
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<user::Model>, RepositoryError> {
        User::find_by_id(id)
            .filter(user::Column::DeletedAt.is_null())
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, RepositoryError> {
        User::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .filter(user::Column::DeletedAt.is_null())
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn count(&self) -> Result<u64, RepositoryError> {
        User::find()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn update_username(
        &self,
        user: user::Model,
        username: String,
    ) -> Result<user::Model, RepositoryError> {
        if username.trim().is_empty() {
            return Err(RepositoryError::Validation("username cannot be empty".into()));
        }
        let mut active = user.into_active_model();
        active.username = Set(username.trim().to_string());
        active.updated_at = Set(Utc::now().into());
        self.save(active).await
    }

    /// Replace the password hash and clear any outstanding reset token.
    pub async fn set_password(
        &self,
        user: user::Model,
        password_hash: String,
    ) -> Result<user::Model, RepositoryError> {
        let mut active = user.into_active_model();
        active.password_hash = Set(password_hash);
        active.reset_token_hash = Set(None);
        active.reset_token_expires_at = Set(None);
        active.updated_at = Set(Utc::now().into());
        self.save(active).await
    }

    /// Store an encrypted TOTP secret and the enabled flag.
    pub async fn set_two_factor(
        &self,
        user: user::Model,
        encrypted_secret: Option<String>,
        enabled: bool,
    ) -> Result<user::Model, RepositoryError> {
        let mut active = user.into_active_model();
        active.two_factor_secret = Set(encrypted_secret);
        active.two_factor_enabled = Set(enabled);
        active.updated_at = Set(Utc::now().into());
        self.save(active).await
    }

    pub async fn set_reset_token(
        &self,
        user: user::Model,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<user::Model, RepositoryError> {
        let mut active = user.into_active_model();
        active.reset_token_hash = Set(Some(token_hash));
        active.reset_token_expires_at = Set(Some(expires_at.into()));
        active.updated_at = Set(Utc::now().into());
        self.save(active).await
    }

    pub async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<user::Model>, RepositoryError> {
        User::find()
            .filter(user::Column::ResetTokenHash.eq(token_hash))
            .filter(user::Column::DeletedAt.is_null())
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_verification_token(
        &self,
        user: user::Model,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<user::Model, RepositoryError> {
        let mut active = user.into_active_model();
        active.verification_token_hash = Set(Some(token_hash));
        active.verification_token_expires_at = Set(Some(expires_at.into()));
        active.updated_at = Set(Utc::now().into());
        self.save(active).await
    }

    pub async fn find_by_verification_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<user::Model>, RepositoryError> {
        User::find()
            .filter(user::Column::VerificationTokenHash.eq(token_hash))
            .filter(user::Column::DeletedAt.is_null())
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn mark_verified(&self, user: user::Model) -> Result<user::Model, RepositoryError> {
        let mut active = user.into_active_model();
        active.is_verified = Set(true);
        active.verification_token_hash = Set(None);
        active.verification_token_expires_at = Set(None);
        active.updated_at = Set(Utc::now().into());
        self.save(active).await
    }

    pub async fn soft_delete(&self, user: user::Model) -> Result<(), RepositoryError> {
        let mut active = user.into_active_model();
        let now = Utc::now();
        active.deleted_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        self.save(active).await.map(|_| ())
    }

    async fn save(&self, active: user::ActiveModel) -> Result<user::Model, RepositoryError> {
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
