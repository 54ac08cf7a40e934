//! # Container Handlers
//!
//! Thin adapters from HTTP to [`ContainerOrchestrator`]. Engine failures,
//! including "not found", surface as 500 with the cause in the message.
//!
//! [`ContainerOrchestrator`]: crate::containers::ContainerOrchestrator

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::types::ApiResponse;
use crate::auth::OrganizationContext;
use crate::containers::engine::{
    ContainerDetails, ImageFilter, ImageSummary, PruneReport, ResourceLimits,
};
use crate::containers::orchestrator::{
    ActionOutcome, ContainerAction, ContainerDefaults, ContainerPage, ListContainersQuery,
    LogsRequest,
};
use crate::error::{ApiError, ErrorEnvelope};
use crate::repositories::OrganizationRepository;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StopQuery {
    /// Seconds to wait before killing; defaults to the organization setting
    pub timeout: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContainerLogs {
    pub container_id: String,
    pub logs: String,
}

async fn defaults_for(
    state: &AppState,
    organization: &OrganizationContext,
) -> Result<ContainerDefaults, ApiError> {
    let org = OrganizationRepository::new(&state.db)
        .require(organization.organization_id)
        .await?;
    Ok(ContainerDefaults::from(&org))
}

async fn run_action(
    state: &AppState,
    organization: &OrganizationContext,
    id: &str,
    action: ContainerAction,
) -> Result<ApiResponse<ActionOutcome>, ApiError> {
    let defaults = defaults_for(state, organization).await?;
    let outcome = state.orchestrator.perform(id, action, defaults).await?;
    Ok(ApiResponse::ok(outcome.message.clone(), outcome))
}

#[utoipa::path(
    get,
    path = "/api/v1/containers",
    security(("bearer_auth" = [])),
    params(ListContainersQuery),
    responses(
        (status = 200, description = "One page of containers", body = ApiResponse<ContainerPage>),
        (status = 400, description = "Unknown sort key or order", body = ErrorEnvelope),
        (status = 500, description = "Engine unreachable", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn list_containers(
    State(state): State<AppState>,
    Query(query): Query<ListContainersQuery>,
) -> Result<ApiResponse<ContainerPage>, ApiError> {
    let page = state.orchestrator.list(&query).await?;
    Ok(ApiResponse::ok("Containers fetched successfully", page))
}

#[utoipa::path(
    get,
    path = "/api/v1/containers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name")),
    responses(
        (status = 200, description = "Container inspection", body = ApiResponse<ContainerDetails>),
        (status = 500, description = "Not found or engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<ContainerDetails>, ApiError> {
    let details = state.orchestrator.get(&id).await?;
    Ok(ApiResponse::ok("Container fetched successfully", details))
}

#[utoipa::path(
    post,
    path = "/api/v1/containers/{id}/start",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name")),
    responses(
        (status = 200, description = "Started, or skipped when protected", body = ApiResponse<ActionOutcome>),
        (status = 500, description = "Engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn start_container(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(id): Path<String>,
) -> Result<ApiResponse<ActionOutcome>, ApiError> {
    run_action(&state, &organization, &id, ContainerAction::Start).await
}

#[utoipa::path(
    post,
    path = "/api/v1/containers/{id}/stop",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name"), StopQuery),
    responses(
        (status = 200, description = "Stopped, or skipped when protected", body = ApiResponse<ActionOutcome>),
        (status = 500, description = "Engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn stop_container(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<ApiResponse<ActionOutcome>, ApiError> {
    let action = ContainerAction::Stop {
        timeout_secs: query.timeout,
    };
    run_action(&state, &organization, &id, action).await
}

#[utoipa::path(
    post,
    path = "/api/v1/containers/{id}/restart",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name"), StopQuery),
    responses(
        (status = 200, description = "Restarted, or skipped when protected", body = ApiResponse<ActionOutcome>),
        (status = 500, description = "Engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn restart_container(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<ApiResponse<ActionOutcome>, ApiError> {
    let action = ContainerAction::Restart {
        timeout_secs: query.timeout,
    };
    run_action(&state, &organization, &id, action).await
}

/// Forced removal
#[utoipa::path(
    delete,
    path = "/api/v1/containers/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name")),
    responses(
        (status = 200, description = "Removed, or skipped when protected", body = ApiResponse<ActionOutcome>),
        (status = 500, description = "Engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn remove_container(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(id): Path<String>,
) -> Result<ApiResponse<ActionOutcome>, ApiError> {
    run_action(&state, &organization, &id, ContainerAction::Remove).await
}

#[utoipa::path(
    patch,
    path = "/api/v1/containers/{id}/resources",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name")),
    request_body = ResourceLimits,
    responses(
        (status = 200, description = "Limits applied", body = ApiResponse<ActionOutcome>),
        (status = 500, description = "Invalid limits, container not running, or engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn update_container_resources(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(id): Path<String>,
    Json(limits): Json<ResourceLimits>,
) -> Result<ApiResponse<ActionOutcome>, ApiError> {
    run_action(
        &state,
        &organization,
        &id,
        ContainerAction::UpdateResources(limits),
    )
    .await
}

#[utoipa::path(
    get,
    path = "/api/v1/containers/{id}/logs",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id or name"), LogsRequest),
    responses(
        (status = 200, description = "Decoded stdout/stderr text", body = ApiResponse<ContainerLogs>),
        (status = 500, description = "Engine failure", body = ErrorEnvelope)
    ),
    tag = "containers"
)]
pub async fn container_logs(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(id): Path<String>,
    Query(request): Query<LogsRequest>,
) -> Result<ApiResponse<ContainerLogs>, ApiError> {
    let defaults = defaults_for(&state, &organization).await?;
    let logs = state.orchestrator.logs(&id, &request, defaults).await?;
    Ok(ApiResponse::ok(
        "Container logs fetched successfully",
        ContainerLogs {
            container_id: id,
            logs,
        },
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/containers/images",
    security(("bearer_auth" = [])),
    params(ImageFilter),
    responses(
        (status = 200, description = "Images on the engine", body = ApiResponse<Vec<ImageSummary>>)
    ),
    tag = "containers"
)]
pub async fn list_images(
    State(state): State<AppState>,
    Query(filter): Query<ImageFilter>,
) -> Result<ApiResponse<Vec<ImageSummary>>, ApiError> {
    let images = state.orchestrator.images(&filter).await?;
    Ok(ApiResponse::ok("Images fetched successfully", images))
}

#[utoipa::path(
    post,
    path = "/api/v1/containers/images/prune",
    security(("bearer_auth" = [])),
    request_body = ImageFilter,
    responses(
        (status = 200, description = "Unused images removed", body = ApiResponse<PruneReport>)
    ),
    tag = "containers"
)]
pub async fn prune_images(
    State(state): State<AppState>,
    Json(filter): Json<ImageFilter>,
) -> Result<ApiResponse<PruneReport>, ApiError> {
    let report = state.orchestrator.prune_images(&filter).await?;
    Ok(ApiResponse::ok("Images pruned successfully", report))
}

#[utoipa::path(
    post,
    path = "/api/v1/containers/prune/build-cache",
    security(("bearer_auth" = [])),
    request_body = ImageFilter,
    responses(
        (status = 200, description = "Build cache pruned", body = ApiResponse<PruneReport>)
    ),
    tag = "containers"
)]
pub async fn prune_build_cache(
    State(state): State<AppState>,
    Json(filter): Json<ImageFilter>,
) -> Result<ApiResponse<PruneReport>, ApiError> {
    let report = state.orchestrator.prune_build_cache(&filter).await?;
    Ok(ApiResponse::ok("Build cache pruned successfully", report))
}
