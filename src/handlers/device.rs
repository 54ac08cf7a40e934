//! # Device Authorization Handlers
//!
//! `code` and `token` speak plain OAuth JSON rather than the API envelope.
//! `approve` and `deny` are called by a signed-in user from the browser.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::types::{ApiResponse, MessageResponse};
use crate::auth::Principal;
use crate::auth::session::AuthResponse;
use crate::device_grant::{DeviceCodeResponse, DeviceGrantError};
use crate::error::{ApiError, ErrorEnvelope};
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceCodeRequest {
    #[schema(example = "nixopus-cli")]
    pub client_id: String,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceTokenRequest {
    #[schema(example = "urn:ietf:params:oauth:grant-type:device_code")]
    pub grant_type: String,
    pub device_code: String,
    pub client_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCodeRequest {
    /// With or without the dash
    #[schema(example = "WDJB-MJHT")]
    pub user_code: String,
}

/// RFC 8628 error body
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct OAuthErrorBody {
    pub error: String,
    pub error_description: String,
}

fn oauth_response(error: DeviceGrantError) -> Response {
    match error.oauth_code() {
        Some(code) => (
            StatusCode::BAD_REQUEST,
            Json(OAuthErrorBody {
                error: code.to_string(),
                error_description: error.to_string(),
            }),
        )
            .into_response(),
        None => {
            tracing::error!(error = %error, "device grant failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(OAuthErrorBody {
                    error: "server_error".to_string(),
                    error_description: "Internal server error".to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/device/code",
    request_body = DeviceCodeRequest,
    responses(
        (status = 200, description = "Grant started", body = DeviceCodeResponse),
        (status = 400, description = "Missing client_id", body = OAuthErrorBody)
    ),
    tag = "device"
)]
pub async fn device_code(
    State(state): State<AppState>,
    Json(request): Json<DeviceCodeRequest>,
) -> Response {
    match state
        .device_grants
        .request_code(&request.client_id, request.scope)
        .await
    {
        Ok(code) => Json(code).into_response(),
        Err(err) => oauth_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/device/token",
    request_body = DeviceTokenRequest,
    responses(
        (status = 200, description = "Grant authorized; tokens minted once", body = AuthResponse),
        (status = 400, description = "authorization_pending, slow_down, expired_token, access_denied", body = OAuthErrorBody)
    ),
    tag = "device"
)]
pub async fn device_token(
    State(state): State<AppState>,
    Json(request): Json<DeviceTokenRequest>,
) -> Response {
    match state
        .device_grants
        .poll(&request.grant_type, &request.device_code, &request.client_id)
        .await
    {
        Ok(tokens) => Json(tokens).into_response(),
        Err(err) => oauth_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/device/approve",
    security(("bearer_auth" = [])),
    request_body = UserCodeRequest,
    responses(
        (status = 200, description = "Grant authorized", body = MessageResponse),
        (status = 400, description = "Grant no longer pending", body = ErrorEnvelope),
        (status = 404, description = "Unknown user code", body = ErrorEnvelope)
    ),
    tag = "device"
)]
pub async fn approve_device(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<UserCodeRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    state
        .device_grants
        .approve(&request.user_code, principal.user_id())
        .await?;
    Ok(ApiResponse::message("Device authorized"))
}

#[utoipa::path(
    post,
    path = "/api/auth/device/deny",
    security(("bearer_auth" = [])),
    request_body = UserCodeRequest,
    responses(
        (status = 200, description = "Grant denied", body = MessageResponse),
        (status = 404, description = "Unknown user code", body = ErrorEnvelope)
    ),
    tag = "device"
)]
pub async fn deny_device(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<UserCodeRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    state
        .device_grants
        .deny(&request.user_code, principal.user_id())
        .await?;
    Ok(ApiResponse::message("Device authorization denied"))
}
