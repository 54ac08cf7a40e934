//! # Deployment Handlers
//!
//! Applications within the organization in context, and family membership.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    response::{Json, Response},
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::cli::{DEFAULT_BRANCH, default_domain};
use super::types::{ApiResponse, created};
use crate::auth::{OrganizationContext, Principal};
use crate::error::{ApiError, ErrorEnvelope, not_found};
use crate::models::views::ApplicationView;
use crate::repositories::ApplicationRepository;
use crate::repositories::application::NewApplication;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToFamilyRequest {
    pub family_id: Uuid,
    pub name: String,
    pub repository: String,
    pub branch: Option<String>,
    /// Subdirectory of the repository to build
    pub base_path: Option<String>,
    pub build_pack: Option<String>,
    pub environment: Option<String>,
    pub environment_variables: Option<BTreeMap<String, String>>,
    pub domain: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/deploy/applications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Applications in the organization", body = ApiResponse<Vec<ApplicationView>>)
    ),
    tag = "deploy"
)]
pub async fn list_applications(
    State(state): State<AppState>,
    organization: OrganizationContext,
) -> Result<ApiResponse<Vec<ApplicationView>>, ApiError> {
    let applications = ApplicationRepository::new(&state.db)
        .list_for_org(organization.organization_id)
        .await?;
    Ok(ApiResponse::ok(
        "Applications fetched successfully",
        applications.iter().map(ApplicationView::from).collect(),
    ))
}

/// Add an application to an existing family
#[utoipa::path(
    post,
    path = "/api/v1/deploy/application/project/add-to-family",
    security(("bearer_auth" = [])),
    request_body = AddToFamilyRequest,
    responses(
        (status = 201, description = "Application created in the family", body = ApiResponse<ApplicationView>),
        (status = 400, description = "Validation failed", body = ErrorEnvelope),
        (status = 404, description = "Family not found in this organization", body = ErrorEnvelope)
    ),
    tag = "deploy"
)]
pub async fn add_to_family(
    State(state): State<AppState>,
    principal: Principal,
    organization: OrganizationContext,
    Json(request): Json<AddToFamilyRequest>,
) -> Result<Response, ApiError> {
    let repo = ApplicationRepository::new(&state.db);
    let family = repo
        .list_family(organization.organization_id, request.family_id)
        .await?;
    let Some(first) = family.first() else {
        return Err(not_found("Family not found"));
    };

    let id = Uuid::new_v4();
    let environment_variables = request
        .environment_variables
        .and_then(|vars| serde_json::to_value(vars).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));
    let application = repo
        .create(
            id,
            NewApplication {
                organization_id: organization.organization_id,
                user_id: principal.user_id(),
                family_id: Some(request.family_id),
                name: request.name,
                repository: request.repository,
                branch: request
                    .branch
                    .filter(|b| !b.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
                base_path: request.base_path.unwrap_or_else(|| "/".to_string()),
                build_pack: request
                    .build_pack
                    .unwrap_or_else(|| first.build_pack.clone()),
                environment: request
                    .environment
                    .unwrap_or_else(|| first.environment.clone()),
                environment_variables,
                domain: Some(
                    request
                        .domain
                        .unwrap_or_else(|| default_domain(id, &state.config.default_domain_suffix)),
                ),
            },
        )
        .await?;

    Ok(created(
        "Application added to family",
        ApplicationView::from(&application),
    ))
}
