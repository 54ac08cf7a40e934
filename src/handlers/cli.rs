//! # CLI Bootstrap Handlers
//!
//! Endpoints the `nixopus` CLI calls with a raw API key in the body, before it
//! has stored any configuration.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::ApiResponse;
use crate::error::{ApiError, ErrorEnvelope, bad_request};
use crate::repositories::ApplicationRepository;
use crate::repositories::application::NewApplication;
use crate::server::AppState;

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ApiKeyValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CliInitRequest {
    pub api_key: String,
    pub name: String,
    pub repository: String,
    pub branch: Option<String>,
    pub environment_variables: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CliInitResponse {
    pub project_id: Uuid,
    pub family_id: Uuid,
    pub domain: String,
}

/// `<first 8 characters of the id>.<suffix>`
pub fn default_domain(application_id: Uuid, suffix: &str) -> String {
    let id = application_id.simple().to_string();
    format!("{}.{}", &id[..8], suffix.trim_start_matches('.'))
}

/// Report whether a key is usable. Never fails with 401; the verdict is in
/// the body.
#[utoipa::path(
    post,
    path = "/api/v1/auth/validate-api-key",
    request_body = ValidateApiKeyRequest,
    responses(
        (status = 200, description = "Validation verdict", body = ApiResponse<ApiKeyValidation>)
    ),
    tag = "cli"
)]
pub async fn validate_api_key(
    State(state): State<AppState>,
    Json(request): Json<ValidateApiKeyRequest>,
) -> Result<ApiResponse<ApiKeyValidation>, ApiError> {
    let verdict = match state.api_keys.verify(request.api_key.trim()).await {
        Ok(_) => ApiKeyValidation {
            valid: true,
            message: None,
        },
        Err(err @ crate::auth::ApiKeyError::Repository(_)) => return Err(err.into()),
        Err(err) => ApiKeyValidation {
            valid: false,
            message: Some(err.to_string()),
        },
    };
    Ok(ApiResponse::ok("API key validated", verdict))
}

/// Create the first application of a new family for a repository.
#[utoipa::path(
    post,
    path = "/api/v1/auth/cli-init",
    request_body = CliInitRequest,
    responses(
        (status = 200, description = "Project created", body = ApiResponse<CliInitResponse>),
        (status = 400, description = "Validation failed", body = ErrorEnvelope),
        (status = 401, description = "API key invalid, revoked or expired", body = ErrorEnvelope)
    ),
    tag = "cli"
)]
pub async fn cli_init(
    State(state): State<AppState>,
    Json(request): Json<CliInitRequest>,
) -> Result<ApiResponse<CliInitResponse>, ApiError> {
    let key = state.api_keys.verify(request.api_key.trim()).await?;
    if request.repository.trim().is_empty() {
        return Err(bad_request("repository is required"));
    }

    let project_id = Uuid::new_v4();
    let family_id = Uuid::new_v4();
    let domain = default_domain(project_id, &state.config.default_domain_suffix);
    let environment_variables = request
        .environment_variables
        .and_then(|vars| serde_json::to_value(vars).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));

    ApplicationRepository::new(&state.db)
        .create(
            project_id,
            NewApplication {
                organization_id: key.organization_id,
                user_id: key.user_id,
                family_id: Some(family_id),
                name: request.name,
                repository: request.repository,
                branch: request
                    .branch
                    .filter(|b| !b.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
                base_path: "/".to_string(),
                build_pack: "dockerfile".to_string(),
                environment: "production".to_string(),
                environment_variables,
                domain: Some(domain.clone()),
            },
        )
        .await?;

    tracing::info!(%project_id, %family_id, organization_id = %key.organization_id, "cli project initialized");
    Ok(ApiResponse::ok(
        "Project initialized successfully",
        CliInitResponse {
            project_id,
            family_id,
            domain,
        },
    ))
}
