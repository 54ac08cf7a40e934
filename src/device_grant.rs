//! OAuth 2.0 device authorization grant (RFC 8628) used by the CLI login.
//!
//! `pending → authorized → consumed`, `pending → denied`, and
//! `pending | authorized → expired`. Every transition is a conditional update
//! on the current state, so concurrent polls mint tokens at most once.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore};
use sea_orm::{DatabaseConnection, DbErr, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::session::AuthResponse;
use crate::auth::{AuthError, AuthService};
use crate::config::DeviceGrantConfig;
use crate::error::{ApiError, RepositoryError, bad_request, not_found};
use crate::models::device_grant::{self, GrantState};
use crate::models::views::UserView;
use crate::repositories::{DeviceGrantRepository, UserRepository};

pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SHORT_GRANT_TYPE: &str = "device_code";
const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const USER_CODE_LEN: usize = 8;
const DEVICE_CODE_BYTES: usize = 32;
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum DeviceGrantError {
    #[error("The authorization request is still pending")]
    AuthorizationPending,
    #[error("Polling too frequently")]
    SlowDown,
    #[error("The device code has expired")]
    ExpiredToken,
    #[error("The user denied the authorization request")]
    AccessDenied,
    #[error("Unknown or invalid device code")]
    InvalidGrant,
    #[error("Unsupported grant type")]
    UnsupportedGrantType,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Unknown user code")]
    UnknownUserCode,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl DeviceGrantError {
    /// OAuth `error` value, for errors that have one.
    pub fn oauth_code(&self) -> Option<&'static str> {
        match self {
            DeviceGrantError::AuthorizationPending => Some("authorization_pending"),
            DeviceGrantError::SlowDown => Some("slow_down"),
            DeviceGrantError::ExpiredToken => Some("expired_token"),
            DeviceGrantError::AccessDenied => Some("access_denied"),
            DeviceGrantError::InvalidGrant | DeviceGrantError::UnknownUserCode => {
                Some("invalid_grant")
            }
            DeviceGrantError::UnsupportedGrantType => Some("unsupported_grant_type"),
            DeviceGrantError::InvalidRequest(_) => Some("invalid_request"),
            DeviceGrantError::Auth(_)
            | DeviceGrantError::Repository(_)
            | DeviceGrantError::Database(_) => None,
        }
    }
}

impl From<DeviceGrantError> for ApiError {
    fn from(error: DeviceGrantError) -> Self {
        match error {
            DeviceGrantError::UnknownUserCode => not_found(&error.to_string()),
            DeviceGrantError::Auth(err) => err.into(),
            DeviceGrantError::Repository(err) => err.into(),
            DeviceGrantError::Database(err) => err.into(),
            other => bad_request(&other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    /// Shown to the user as `XXXX-XXXX`
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Debug, Clone)]
pub struct DeviceGrantService {
    db: DatabaseConnection,
    auth: AuthService,
    ttl: Duration,
    interval_seconds: i64,
    verification_uri: String,
}

impl DeviceGrantService {
    pub fn new(db: DatabaseConnection, auth: AuthService, config: &DeviceGrantConfig) -> Self {
        Self {
            db,
            auth,
            ttl: Duration::seconds(config.code_ttl_seconds as i64),
            interval_seconds: config.poll_interval_seconds as i64,
            verification_uri: config.verification_uri.clone(),
        }
    }

    /// Start a grant for `client_id`.
    pub async fn request_code(
        &self,
        client_id: &str,
        scope: Option<String>,
    ) -> Result<DeviceCodeResponse, DeviceGrantError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(DeviceGrantError::InvalidRequest(
                "client_id is required".into(),
            ));
        }

        let repo = DeviceGrantRepository::new(&self.db);
        let now = Utc::now();
        let mut attempt = 0;
        let grant = loop {
            attempt += 1;
            let insert = repo
                .insert(device_grant::ActiveModel {
                    device_code: Set(generate_device_code()),
                    user_code: Set(generate_user_code()),
                    client_id: Set(client_id.to_string()),
                    scope: Set(scope.clone()),
                    verification_uri: Set(self.verification_uri.clone()),
                    interval_seconds: Set(self.interval_seconds as i32),
                    state: Set(GrantState::Pending.as_str().to_string()),
                    user_id: Set(None),
                    issued_at: Set(now.into()),
                    expires_at: Set((now + self.ttl).into()),
                    last_polled_at: Set(None),
                    decided_at: Set(None),
                })
                .await;
            match insert {
                Ok(grant) => break grant,
                Err(RepositoryError::Conflict(_)) if attempt < MAX_CODE_ATTEMPTS => continue,
                Err(err) => return Err(err.into()),
            }
        };

        let display_code = display_user_code(&grant.user_code);
        tracing::info!(client_id, user_code = %display_code, "device authorization started");
        Ok(DeviceCodeResponse {
            verification_uri_complete: complete_uri(&grant.verification_uri, &display_code),
            device_code: grant.device_code,
            user_code: display_code,
            verification_uri: grant.verification_uri,
            expires_in: self.ttl.num_seconds(),
            interval: self.interval_seconds,
        })
    }

    pub async fn poll(
        &self,
        grant_type: &str,
        device_code: &str,
        client_id: &str,
    ) -> Result<AuthResponse, DeviceGrantError> {
        self.poll_at(grant_type, device_code, client_id, Utc::now())
            .await
    }

    /// Token endpoint logic evaluated at `now`.
    pub async fn poll_at(
        &self,
        grant_type: &str,
        device_code: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthResponse, DeviceGrantError> {
        if grant_type != DEVICE_CODE_GRANT_TYPE && grant_type != SHORT_GRANT_TYPE {
            return Err(DeviceGrantError::UnsupportedGrantType);
        }

        let repo = DeviceGrantRepository::new(&self.db);
        let grant = repo
            .find_by_device_code(device_code)
            .await?
            .filter(|grant| grant.client_id == client_id)
            .ok_or(DeviceGrantError::InvalidGrant)?;

        let state = grant.grant_state();
        match state {
            GrantState::Consumed | GrantState::Expired => {
                return Err(DeviceGrantError::ExpiredToken);
            }
            GrantState::Denied => return Err(DeviceGrantError::AccessDenied),
            GrantState::Pending | GrantState::Authorized => {}
        }

        if now >= grant.expires_at {
            repo.transition(
                device_code,
                &[GrantState::Pending, GrantState::Authorized],
                GrantState::Expired,
                None,
            )
            .await?;
            return Err(DeviceGrantError::ExpiredToken);
        }

        if state == GrantState::Pending {
            let too_soon = grant.interval_seconds > 0
                && grant.last_polled_at.is_some_and(|last| {
                    now.signed_duration_since(last) < Duration::seconds(grant.interval_seconds as i64)
                });
            repo.record_poll(device_code, now.into()).await?;
            return Err(if too_soon {
                DeviceGrantError::SlowDown
            } else {
                DeviceGrantError::AuthorizationPending
            });
        }

        self.mint(grant).await
    }

    /// Approve the grant identified by `user_code` on behalf of `user_id`.
    pub async fn approve(&self, user_code: &str, user_id: Uuid) -> Result<(), DeviceGrantError> {
        self.decide(user_code, user_id, GrantState::Authorized).await
    }

    pub async fn deny(&self, user_code: &str, user_id: Uuid) -> Result<(), DeviceGrantError> {
        self.decide(user_code, user_id, GrantState::Denied).await
    }

    /// Delete grants that expired more than one lifetime ago.
    pub async fn purge_expired(&self) -> Result<u64, DeviceGrantError> {
        self.purge_expired_at(Utc::now()).await
    }

    /// Late polls on a recently expired grant still see `expired_token`, so
    /// rows are kept for one more lifetime past `expires_at`.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64, DeviceGrantError> {
        Ok(DeviceGrantRepository::new(&self.db)
            .purge_expired((now - self.ttl).into())
            .await?)
    }

    async fn decide(
        &self,
        user_code: &str,
        user_id: Uuid,
        to: GrantState,
    ) -> Result<(), DeviceGrantError> {
        let code = normalize_user_code(user_code).ok_or(DeviceGrantError::UnknownUserCode)?;
        let repo = DeviceGrantRepository::new(&self.db);
        let grant = repo
            .find_by_user_code(&code)
            .await?
            .ok_or(DeviceGrantError::UnknownUserCode)?;

        let now = Utc::now();
        if now >= grant.expires_at {
            repo.transition(
                &grant.device_code,
                &[GrantState::Pending, GrantState::Authorized],
                GrantState::Expired,
                None,
            )
            .await?;
            return Err(DeviceGrantError::ExpiredToken);
        }

        let moved = repo
            .transition(
                &grant.device_code,
                &[GrantState::Pending],
                to,
                Some((user_id, now.into())),
            )
            .await?;
        if !moved {
            let current = repo.find_by_device_code(&grant.device_code).await?;
            let repeated = current.is_some_and(|current| {
                current.grant_state() == to && current.user_id == Some(user_id)
            });
            if repeated {
                return Ok(());
            }
            return Err(DeviceGrantError::InvalidRequest(
                "The authorization request is no longer pending".into(),
            ));
        }

        tracing::info!(%user_id, state = %to, "device authorization decided");
        Ok(())
    }

    async fn mint(&self, grant: device_grant::Model) -> Result<AuthResponse, DeviceGrantError> {
        let user_id = grant.user_id.ok_or(DeviceGrantError::InvalidGrant)?;

        let txn = self.db.begin().await?;
        let won = DeviceGrantRepository::new(&txn)
            .transition(
                &grant.device_code,
                &[GrantState::Authorized],
                GrantState::Consumed,
                None,
            )
            .await?;
        if !won {
            return Err(DeviceGrantError::ExpiredToken);
        }

        let user = UserRepository::new(&txn)
            .find_by_id(user_id)
            .await?
            .ok_or(DeviceGrantError::AccessDenied)?;
        let tokens = self.auth.issue_tokens(&txn, &user).await?;
        txn.commit().await?;

        tracing::info!(%user_id, "device authorization consumed");
        Ok(AuthResponse {
            tokens,
            user: UserView::from(&user),
        })
    }
}

fn generate_device_code() -> String {
    let mut bytes = [0u8; DEVICE_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    (0..USER_CODE_LEN)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect()
}

/// `ABCD1234` → `ABCD-1234`
pub fn display_user_code(code: &str) -> String {
    if code.len() != USER_CODE_LEN {
        return code.to_string();
    }
    format!("{}-{}", &code[..4], &code[4..])
}

/// Accepts `abcd-1234`, `ABCD 1234` and similar. `None` if the shape is wrong.
pub fn normalize_user_code(input: &str) -> Option<String> {
    let code: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let valid = code.len() == USER_CODE_LEN && code.bytes().all(|b| b.is_ascii_alphanumeric());
    valid.then_some(code)
}

fn complete_uri(base: &str, user_code: &str) -> String {
    match url::Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("user_code", user_code);
            url.to_string()
        }
        Err(_) => format!("{base}?user_code={user_code}"),
    }
}
