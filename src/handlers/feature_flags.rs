//! # Feature Flag Handlers

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::types::ApiResponse;
use crate::auth::OrganizationContext;
use crate::error::{ApiError, ErrorEnvelope, bad_request};
use crate::models::views::FeatureFlagView;
use crate::repositories::FeatureFlagRepository;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateFeatureFlagRequest {
    #[schema(example = "terminal")]
    pub feature_name: String,
    pub is_enabled: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeatureCheckQuery {
    pub feature_name: String,
}

/// All flags for the organization, with missing defaults seeded as enabled
#[utoipa::path(
    get,
    path = "/api/v1/feature-flags",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Feature flags", body = ApiResponse<Vec<FeatureFlagView>>)
    ),
    tag = "feature-flags"
)]
pub async fn list_feature_flags(
    State(state): State<AppState>,
    organization: OrganizationContext,
) -> Result<ApiResponse<Vec<FeatureFlagView>>, ApiError> {
    let flags = FeatureFlagRepository::new(&state.db)
        .list_for_org(organization.organization_id)
        .await?;
    Ok(ApiResponse::ok(
        "Feature flags fetched successfully",
        flags.iter().map(FeatureFlagView::from).collect(),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/feature-flags",
    security(("bearer_auth" = [])),
    request_body = UpdateFeatureFlagRequest,
    responses(
        (status = 200, description = "Flag stored", body = ApiResponse<FeatureFlagView>),
        (status = 400, description = "Missing feature name", body = ErrorEnvelope),
        (status = 403, description = "Insufficient permissions", body = ErrorEnvelope)
    ),
    tag = "feature-flags"
)]
pub async fn update_feature_flag(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Json(request): Json<UpdateFeatureFlagRequest>,
) -> Result<ApiResponse<FeatureFlagView>, ApiError> {
    let flag = FeatureFlagRepository::new(&state.db)
        .set(
            organization.organization_id,
            &request.feature_name,
            request.is_enabled,
        )
        .await?;
    tracing::info!(
        organization_id = %organization.organization_id,
        feature = %flag.feature_name,
        enabled = flag.is_enabled,
        "feature flag updated"
    );
    Ok(ApiResponse::ok(
        "Feature flag updated successfully",
        FeatureFlagView::from(&flag),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/feature-flags/check",
    security(("bearer_auth" = [])),
    params(FeatureCheckQuery),
    responses(
        (status = 200, description = "Whether the feature is enabled", body = ApiResponse<FeatureFlagView>)
    ),
    tag = "feature-flags"
)]
pub async fn check_feature_flag(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Query(query): Query<FeatureCheckQuery>,
) -> Result<ApiResponse<FeatureFlagView>, ApiError> {
    let feature_name = query.feature_name.trim();
    if feature_name.is_empty() {
        return Err(bad_request("feature_name is required"));
    }
    let is_enabled = FeatureFlagRepository::new(&state.db)
        .is_enabled(organization.organization_id, feature_name)
        .await?;
    Ok(ApiResponse::ok(
        "Feature flag checked",
        FeatureFlagView {
            feature_name: feature_name.to_string(),
            is_enabled,
        },
    ))
}
