//! API key issuance and verification.
//!
//! A key is 32 random bytes rendered as URL-safe base64 (`raw`). Its display
//! string is `nixopus_<raw[..8]>_<raw[8..]>`; only the SHA-256 of the display
//! string and the 8-character prefix are persisted.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{Duration, Utc};
use rand::RngCore;
use sea_orm::{DatabaseConnection, Set};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::api_key_cache::ApiKeyCache;
use crate::error::RepositoryError;
use crate::models::api_key;
use crate::repositories::ApiKeyRepository;

pub const KEY_PREFIX: &str = "nixopus_";
const RANDOM_BYTES: usize = 32;
const PREFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error("invalid format")]
    InvalidFormat,
    #[error("api key not found")]
    NotFound,
    #[error("api key revoked")]
    Revoked,
    #[error("api key expired")]
    Expired,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Secret material for a new key. `display` is handed to the caller once.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub display: String,
    pub prefix: String,
    pub hash: String,
}

pub fn generate_key_material() -> KeyMaterial {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = URL_SAFE.encode(bytes);

    let (prefix, rest) = raw.split_at(PREFIX_LEN);
    let display = format!("{KEY_PREFIX}{prefix}_{rest}");
    KeyMaterial {
        hash: hash_key(&display),
        prefix: prefix.to_string(),
        display,
    }
}

/// Lowercase hex SHA-256 of a display string
pub fn hash_key(display: &str) -> String {
    hex::encode(Sha256::digest(display.as_bytes()))
}

/// Cheap shape check performed before any lookup.
pub fn check_format(display: &str) -> Result<(), ApiKeyError> {
    if display.len() < KEY_PREFIX.len() + 1 || !display.starts_with(KEY_PREFIX) {
        return Err(ApiKeyError::InvalidFormat);
    }
    Ok(())
}

/// Issues, verifies and revokes API keys, fronted by [`ApiKeyCache`].
#[derive(Debug, Clone)]
pub struct ApiKeyService {
    db: DatabaseConnection,
    cache: Arc<ApiKeyCache>,
}

impl ApiKeyService {
    pub fn new(db: DatabaseConnection, cache: Arc<ApiKeyCache>) -> Self {
        Self { db, cache }
    }

    pub fn cache(&self) -> &Arc<ApiKeyCache> {
        &self.cache
    }

    /// Create a key for `user_id` in `organization_id`. Returns the display
    /// string together with the stored record.
    pub async fn generate(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        name: &str,
        ttl_days: Option<i64>,
    ) -> Result<(String, api_key::Model), ApiKeyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiKeyError::Validation("name is required".into()));
        }
        if ttl_days.is_some_and(|days| days <= 0) {
            return Err(ApiKeyError::Validation(
                "expires_in_days must be positive".into(),
            ));
        }

        let material = generate_key_material();
        let now = Utc::now();
        let record = ApiKeyRepository::new(&self.db)
            .insert(api_key::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                organization_id: Set(organization_id),
                name: Set(name.to_string()),
                key_hash: Set(material.hash),
                prefix: Set(material.prefix),
                expires_at: Set(ttl_days.map(|days| (now + Duration::days(days)).into())),
                last_used_at: Set(None),
                revoked_at: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            })
            .await?;

        tracing::info!(key_id = %record.id, %user_id, %organization_id, "api key created");
        Ok((material.display, record))
    }

    /// Resolve a display string to its live record.
    pub async fn verify(&self, display: &str) -> Result<api_key::Model, ApiKeyError> {
        check_format(display)?;
        let key_hash = hash_key(display);

        if let Some(record) = self.cache.get(&key_hash).await {
            self.touch(record.id).await;
            return Ok(record);
        }

        let record = ApiKeyRepository::new(&self.db)
            .find_by_hash(&key_hash)
            .await?
            .ok_or(ApiKeyError::NotFound)?;
        let now = Utc::now();
        if record.is_revoked() {
            return Err(ApiKeyError::Revoked);
        }
        if record.is_expired(now.into()) {
            return Err(ApiKeyError::Expired);
        }

        self.cache.insert(record.clone()).await;
        self.touch(record.id).await;
        Ok(record)
    }

    /// Revoke a key owned by `user_id`.
    pub async fn revoke(&self, user_id: Uuid, key_id: Uuid) -> Result<(), ApiKeyError> {
        let repo = ApiKeyRepository::new(&self.db);
        let record = repo
            .find_by_id(key_id)
            .await?
            .filter(|record| record.user_id == user_id)
            .ok_or(ApiKeyError::NotFound)?;

        repo.revoke(record.id).await?;
        self.cache.invalidate_key(record.id).await;
        tracing::info!(key_id = %record.id, "api key revoked");
        Ok(())
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<api_key::Model>, ApiKeyError> {
        Ok(ApiKeyRepository::new(&self.db)
            .list_for_user(user_id, organization_id)
            .await?)
    }

    async fn touch(&self, key_id: Uuid) {
        if let Err(err) = ApiKeyRepository::new(&self.db).touch_last_used(key_id).await {
            tracing::warn!(%key_id, error = %err, "failed to update api key last_used_at");
        }
    }
}
