//! # Authentication Handlers
//!
//! Registration, login (with and without a second factor), refresh rotation,
//! logout, password reset, email verification and 2FA management.

use axum::{
    extract::State,
    response::{Json, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::types::{ApiResponse, MessageResponse, created};
use crate::auth::Principal;
use crate::auth::session::{AuthResponse, RegisterRequest, TwoFactorSetup};
use crate::error::{ApiError, ErrorEnvelope};
use crate::models::views::UserView;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "admin@example.com")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TwoFactorLoginRequest {
    pub email: String,
    pub password: String,
    /// Six-digit TOTP code
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TwoFactorCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyEmailRequest {
    pub token: String,
}

/// Create an account
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Validation failed or email taken", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let response = state.auth.register(request).await?;
    Ok(created("User registered successfully", response))
}

/// Password login for accounts without a second factor
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid credentials or 2FA required", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<ApiResponse<AuthResponse>, ApiError> {
    let response = state.auth.login(&request.email, &request.password).await?;
    Ok(ApiResponse::ok("User logged in successfully", response))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa-login",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Logged in", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid credentials or code", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn two_factor_login(
    State(state): State<AppState>,
    Json(request): Json<TwoFactorLoginRequest>,
) -> Result<ApiResponse<AuthResponse>, ApiError> {
    let response = state
        .auth
        .two_factor_login(&request.email, &request.password, &request.code)
        .await?;
    Ok(ApiResponse::ok("User logged in successfully", response))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token pair", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Refresh token invalid, revoked or expired", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<ApiResponse<AuthResponse>, ApiError> {
    let response = state.auth.refresh(&request.refresh_token).await?;
    Ok(ApiResponse::ok("Token refreshed successfully", response))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    security(("bearer_auth" = [])),
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Refresh token revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    state
        .auth
        .logout(principal.user_id(), &request.refresh_token)
        .await?;
    Ok(ApiResponse::message("User logged out successfully"))
}

/// Always succeeds so addresses cannot be probed
#[utoipa::path(
    post,
    path = "/api/v1/auth/request-password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset link queued if the account exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    state.auth.request_password_reset(&request.email).await?;
    Ok(ApiResponse::message("Password reset link sent"))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Token invalid or password too weak", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    state
        .auth
        .reset_password(&request.token, &request.password)
        .await?;
    Ok(ApiResponse::message("Password reset successfully"))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/setup-2fa",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Secret generated; confirm with verify-2fa", body = ApiResponse<TwoFactorSetup>),
        (status = 400, description = "Already enabled", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn setup_two_factor(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<TwoFactorSetup>, ApiError> {
    let user_id = principal.user_id();
    let setup = state.auth.setup_two_factor(principal.user).await?;
    state.user_cache.invalidate(&user_id).await;
    Ok(ApiResponse::ok("Two-factor setup started", setup))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-2fa",
    security(("bearer_auth" = [])),
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = ApiResponse<UserView>),
        (status = 401, description = "Invalid code", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<TwoFactorCodeRequest>,
) -> Result<ApiResponse<UserView>, ApiError> {
    let user = state
        .auth
        .verify_two_factor(principal.user, &request.code)
        .await?;
    state.user_cache.invalidate(&user.id).await;
    Ok(ApiResponse::ok("Two-factor authentication enabled", UserView::from(&user)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/disable-2fa",
    security(("bearer_auth" = [])),
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Two-factor disabled", body = ApiResponse<UserView>),
        (status = 400, description = "Not enabled", body = ErrorEnvelope),
        (status = 401, description = "Invalid code", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn disable_two_factor(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<TwoFactorCodeRequest>,
) -> Result<ApiResponse<UserView>, ApiError> {
    let user = state
        .auth
        .disable_two_factor(principal.user, &request.code)
        .await?;
    state.user_cache.invalidate(&user.id).await;
    Ok(ApiResponse::ok("Two-factor authentication disabled", UserView::from(&user)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/send-verification",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Verification email queued", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn send_verification(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<()>, ApiError> {
    state.auth.send_verification(principal.user).await?;
    Ok(ApiResponse::message("Verification email sent"))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = ApiResponse<UserView>),
        (status = 400, description = "Token invalid or expired", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<ApiResponse<UserView>, ApiError> {
    let user = state.auth.verify_email(&request.token).await?;
    state.user_cache.invalidate(&user.id).await;
    Ok(ApiResponse::ok("Email verified successfully", UserView::from(&user)))
}
