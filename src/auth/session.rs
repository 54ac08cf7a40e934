//! Account and session flows: registration, login, 2FA, refresh rotation,
//! logout, password reset and email verification.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use rand::RngCore;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use super::jwt::JwtKeys;
use super::password::{hash_password, validate_password, verify_password};
use super::{AuthError, totp};
use crate::config::AuthConfig;
use crate::crypto::{CryptoKey, decrypt_totp_secret, encrypt_totp_secret};
use crate::models::user::{self, UserType};
use crate::models::views::UserView;
use crate::notifications::{Notification, NotificationQueue};
use crate::repositories::organization::CreateOrganizationRequest;
use crate::repositories::user::NewUser;
use crate::repositories::{
    OrganizationRepository, RefreshTokenRepository, RoleRepository, UserRepository,
};
use crate::seeds::ADMIN_ROLE;

const VERIFICATION_TTL_HOURS: i64 = 24;

/// Access/refresh pair returned by every successful login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: AuthTokens,
    pub user: UserView,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthService {
    db: DatabaseConnection,
    jwt: Arc<JwtKeys>,
    crypto_key: CryptoKey,
    notifications: NotificationQueue,
    refresh_ttl: Duration,
    reset_ttl: Duration,
}

impl AuthService {
    pub fn new(
        db: DatabaseConnection,
        jwt: Arc<JwtKeys>,
        crypto_key: CryptoKey,
        notifications: NotificationQueue,
        config: &AuthConfig,
    ) -> Self {
        Self {
            db,
            jwt,
            crypto_key,
            notifications,
            refresh_ttl: Duration::days(config.refresh_token_ttl_days as i64),
            reset_ttl: Duration::minutes(config.password_reset_ttl_minutes as i64),
        }
    }

    pub fn jwt(&self) -> &JwtKeys {
        &self.jwt
    }

    /// Create an account. The very first account becomes a platform admin
    /// and receives a default organization in which it holds the admin role.
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AuthError> {
        validate_password(&request.password)?;
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(AuthError::Validation("username is required".into()));
        }
        let password_hash = hash_password(&request.password)?;

        let txn = self.db.begin().await?;
        let users = UserRepository::new(&txn);
        let first_user = users.count().await? == 0;
        let user = users
            .create(NewUser {
                email: request.email,
                username: username.clone(),
                password_hash,
                user_type: if first_user {
                    UserType::Admin
                } else {
                    UserType::Member
                },
            })
            .await?;

        if first_user {
            let org = OrganizationRepository::new(&txn)
                .create(CreateOrganizationRequest {
                    name: format!("{username}'s Organization"),
                    description: "Default organization".to_string(),
                    settings: None,
                })
                .await?;
            let admin = RoleRepository::new(&txn).require_by_name(ADMIN_ROLE).await?;
            OrganizationRepository::new(&txn)
                .add_member(org.id, user.id, admin.id)
                .await?;
            tracing::info!(user_id = %user.id, organization_id = %org.id, "bootstrapped first admin");
        }

        let tokens = self.issue_tokens(&txn, &user).await?;
        txn.commit().await?;

        if let Err(err) = self.send_verification(user.clone()).await {
            tracing::warn!(user_id = %user.id, error = %err, "failed to queue verification email");
        }

        Ok(AuthResponse {
            tokens,
            user: UserView::from(&user),
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let user = self.check_credentials(email, password).await?;
        if user.two_factor_enabled {
            return Err(AuthError::TwoFactorRequired);
        }
        self.respond(user).await
    }

    pub async fn two_factor_login(
        &self,
        email: &str,
        password: &str,
        code: &str,
    ) -> Result<AuthResponse, AuthError> {
        let user = self.check_credentials(email, password).await?;
        if !user.two_factor_enabled {
            return Err(AuthError::TwoFactorNotConfigured);
        }
        self.check_totp(&user, code)?;
        self.respond(user).await
    }

    /// Exchange a live refresh token for a new pair. The old token is
    /// revoked in the same transaction that issues the new one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        let txn = self.db.begin().await?;
        let tokens = RefreshTokenRepository::new(&txn);

        let existing = tokens
            .find_by_token(refresh_token)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        if !existing.is_live(Utc::now().into()) {
            return Err(AuthError::InvalidRefreshToken);
        }
        if !tokens.revoke_if_live(existing.id).await? {
            return Err(AuthError::InvalidRefreshToken);
        }

        let user = UserRepository::new(&txn)
            .find_by_id(existing.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        let issued = self.issue_tokens(&txn, &user).await?;
        txn.commit().await?;

        Ok(AuthResponse {
            tokens: issued,
            user: UserView::from(&user),
        })
    }

    /// Revoke one of the caller's refresh tokens.
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<(), AuthError> {
        let tokens = RefreshTokenRepository::new(&self.db);
        let existing = tokens
            .find_by_token(refresh_token)
            .await?
            .filter(|token| token.user_id == user_id)
            .ok_or(AuthError::InvalidRefreshToken)?;
        tokens.revoke_if_live(existing.id).await?;
        Ok(())
    }

    /// Queue a reset link. Unknown addresses succeed silently.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let users = UserRepository::new(&self.db);
        let Some(user) = users.find_by_email(email).await? else {
            tracing::info!("password reset requested for unknown address");
            return Ok(());
        };

        let token = random_token();
        let email = user.email.clone();
        users
            .set_reset_token(user, hash_token(&token), Utc::now() + self.reset_ttl)
            .await?;
        self.notifications
            .enqueue(Notification::PasswordReset { email, token });
        Ok(())
    }

    /// Consume a reset token, set the new password and revoke every session.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password)?;
        let users = UserRepository::new(&self.db);
        let user = users
            .find_by_reset_token_hash(&hash_token(token))
            .await?
            .ok_or(AuthError::InvalidResetToken)?;
        let live = user
            .reset_token_expires_at
            .is_some_and(|expires_at| expires_at > Utc::now());
        if !live {
            return Err(AuthError::InvalidResetToken);
        }

        let user_id = user.id;
        users.set_password(user, hash_password(new_password)?).await?;
        let revoked = RefreshTokenRepository::new(&self.db)
            .revoke_all_for_user(user_id)
            .await?;
        tracing::info!(%user_id, revoked, "password reset");
        Ok(())
    }

    /// Generate and store (disabled) a new TOTP secret.
    pub async fn setup_two_factor(&self, user: user::Model) -> Result<TwoFactorSetup, AuthError> {
        if user.two_factor_enabled {
            return Err(AuthError::Validation(
                "two-factor authentication is already enabled".into(),
            ));
        }
        let secret = totp::generate_secret();
        let sealed = encrypt_totp_secret(&self.crypto_key, user.id, &secret)?;
        let otpauth_url = totp::provisioning_uri(&secret, &user.email);
        UserRepository::new(&self.db)
            .set_two_factor(user, Some(sealed), false)
            .await?;
        Ok(TwoFactorSetup {
            secret,
            otpauth_url,
        })
    }

    /// Enable 2FA once the user proves possession of the secret.
    pub async fn verify_two_factor(
        &self,
        user: user::Model,
        code: &str,
    ) -> Result<user::Model, AuthError> {
        self.check_totp(&user, code)?;
        let secret = user.two_factor_secret.clone();
        Ok(UserRepository::new(&self.db)
            .set_two_factor(user, secret, true)
            .await?)
    }

    pub async fn disable_two_factor(
        &self,
        user: user::Model,
        code: &str,
    ) -> Result<user::Model, AuthError> {
        if !user.two_factor_enabled {
            return Err(AuthError::TwoFactorNotConfigured);
        }
        self.check_totp(&user, code)?;
        Ok(UserRepository::new(&self.db)
            .set_two_factor(user, None, false)
            .await?)
    }

    pub async fn send_verification(&self, user: user::Model) -> Result<(), AuthError> {
        if user.is_verified {
            return Ok(());
        }
        let token = random_token();
        let email = user.email.clone();
        UserRepository::new(&self.db)
            .set_verification_token(
                user,
                hash_token(&token),
                Utc::now() + Duration::hours(VERIFICATION_TTL_HOURS),
            )
            .await?;
        self.notifications
            .enqueue(Notification::EmailVerification { email, token });
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<user::Model, AuthError> {
        let users = UserRepository::new(&self.db);
        let user = users
            .find_by_verification_token_hash(&hash_token(token))
            .await?
            .ok_or(AuthError::InvalidVerificationToken)?;
        let live = user
            .verification_token_expires_at
            .is_some_and(|expires_at| expires_at > Utc::now());
        if !live {
            return Err(AuthError::InvalidVerificationToken);
        }
        Ok(users.mark_verified(user).await?)
    }

    /// Sign an access token and persist a refresh token on `db`.
    pub async fn issue_tokens<C: ConnectionTrait>(
        &self,
        db: &C,
        user: &user::Model,
    ) -> Result<AuthTokens, AuthError> {
        let access = self.jwt.issue(user)?;
        let refresh = RefreshTokenRepository::new(db)
            .issue(user.id, self.refresh_ttl)
            .await?;
        Ok(AuthTokens {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in,
        })
    }

    async fn respond(&self, user: user::Model) -> Result<AuthResponse, AuthError> {
        let tokens = self.issue_tokens(&self.db, &user).await?;
        tracing::info!(user_id = %user.id, "user logged in");
        Ok(AuthResponse {
            tokens,
            user: UserView::from(&user),
        })
    }

    async fn check_credentials(&self, email: &str, password: &str) -> Result<user::Model, AuthError> {
        let user = UserRepository::new(&self.db)
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user)
    }

    fn check_totp(&self, user: &user::Model, code: &str) -> Result<(), AuthError> {
        let sealed = user
            .two_factor_secret
            .as_deref()
            .ok_or(AuthError::TwoFactorNotConfigured)?;
        let secret = decrypt_totp_secret(&self.crypto_key, user.id, sealed)?;
        if totp::verify_code(&secret, code, Utc::now().timestamp()) {
            Ok(())
        } else {
            Err(AuthError::InvalidTwoFactorCode)
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
