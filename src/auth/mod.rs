//! # Authentication
//!
//! Credentials (passwords, TOTP, access and refresh tokens, API keys) and the
//! request-scoped identity types the admission pipeline attaches to each
//! request.

use axum::{extract::FromRequestParts, http::request::Parts};
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::error::{ApiError, RepositoryError, bad_request, internal_error, unauthorized};
use crate::models::user;

pub mod api_key;
pub mod api_key_cache;
pub mod cache;
pub mod jwt;
pub mod password;
pub mod session;
pub mod totp;

pub use api_key::{ApiKeyError, ApiKeyService};
pub use api_key_cache::ApiKeyCache;
pub use cache::{MembershipCache, UserCache};
pub use jwt::JwtKeys;
pub use session::AuthService;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Two-factor authentication required")]
    TwoFactorRequired,
    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,
    #[error("Two-factor authentication is not set up")]
    TwoFactorNotConfigured,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    #[error("Invalid or expired reset token")]
    InvalidResetToken,
    #[error("Invalid or expired verification token")]
    InvalidVerificationToken,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials
            | AuthError::TwoFactorRequired
            | AuthError::InvalidTwoFactorCode
            | AuthError::InvalidToken
            | AuthError::InvalidRefreshToken => unauthorized(Some(&error.to_string())),
            AuthError::TwoFactorNotConfigured
            | AuthError::InvalidResetToken
            | AuthError::InvalidVerificationToken
            | AuthError::Validation(_) => bad_request(&error.to_string()),
            AuthError::Internal(message) => {
                tracing::error!(error = %message, "authentication failure");
                internal_error()
            }
            AuthError::Crypto(err) => {
                tracing::error!(error = %err, "secret decryption failed");
                internal_error()
            }
            AuthError::Repository(err) => err.into(),
            AuthError::Database(err) => err.into(),
        }
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(error: ApiKeyError) -> Self {
        match error {
            ApiKeyError::InvalidFormat
            | ApiKeyError::NotFound
            | ApiKeyError::Revoked
            | ApiKeyError::Expired => unauthorized(Some(&error.to_string())),
            ApiKeyError::Validation(message) => bad_request(&message),
            ApiKeyError::Repository(err) => err.into(),
        }
    }
}

/// How the principal proved its identity. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Session,
    ApiKey {
        key_id: Uuid,
        organization_id: Uuid,
    },
}

/// The authenticated identity driving a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: user::Model,
    pub mode: AuthMode,
}

impl Principal {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    /// Organization the credential is bound to, for API keys.
    pub fn bound_organization(&self) -> Option<Uuid> {
        match self.mode {
            AuthMode::ApiKey {
                organization_id, ..
            } => Some(organization_id),
            AuthMode::Session => None,
        }
    }
}

/// Organization resolved for a request, with the role the principal holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizationContext {
    pub organization_id: Uuid,
    pub role_id: Uuid,
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}

impl<S> FromRequestParts<S> for OrganizationContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OrganizationContext>()
            .copied()
            .ok_or_else(|| bad_request("Organization context missing"))
    }
}
