//! # API Key Handlers
//!
//! Keys are scoped to the caller and the organization in context. The display
//! string is returned exactly once, by `create_api_key`.

use axum::{
    extract::{Path, State},
    response::{Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::{ApiResponse, MessageResponse, created};
use crate::auth::{ApiKeyError, OrganizationContext, Principal};
use crate::error::{ApiError, ErrorEnvelope, not_found};
use crate::models::views::ApiKeyView;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateApiKeyRequest {
    #[schema(example = "ci-deploy")]
    pub name: String,
    /// Days until expiry; omitted keys never expire
    pub ttl_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedApiKey {
    /// `nixopus_<prefix>_<rest>`; not retrievable later
    pub api_key: String,
    pub key: ApiKeyView,
}

#[utoipa::path(
    post,
    path = "/api/v1/api-keys",
    security(("bearer_auth" = [])),
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key issued", body = ApiResponse<CreatedApiKey>),
        (status = 400, description = "Validation failed", body = ErrorEnvelope),
        (status = 403, description = "Insufficient permissions", body = ErrorEnvelope)
    ),
    tag = "api-keys"
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    principal: Principal,
    organization: OrganizationContext,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<Response, ApiError> {
    let (display, record) = state
        .api_keys
        .generate(
            principal.user_id(),
            organization.organization_id,
            &request.name,
            request.ttl_days,
        )
        .await?;
    Ok(created(
        "API key created successfully",
        CreatedApiKey {
            api_key: display,
            key: ApiKeyView::from(&record),
        },
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/api-keys",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's keys in this organization", body = ApiResponse<Vec<ApiKeyView>>)
    ),
    tag = "api-keys"
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    principal: Principal,
    organization: OrganizationContext,
) -> Result<ApiResponse<Vec<ApiKeyView>>, ApiError> {
    let keys = state
        .api_keys
        .list(principal.user_id(), organization.organization_id)
        .await?;
    Ok(ApiResponse::ok(
        "API keys fetched successfully",
        keys.iter().map(ApiKeyView::from).collect(),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/api-keys/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 200, description = "Key revoked", body = MessageResponse),
        (status = 404, description = "No such key for this user", body = ErrorEnvelope)
    ),
    tag = "api-keys"
)]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    match state.api_keys.revoke(principal.user_id(), id).await {
        Ok(()) => Ok(ApiResponse::message("API key revoked successfully")),
        Err(ApiKeyError::NotFound) => Err(not_found("API key not found")),
        Err(err) => Err(err.into()),
    }
}
