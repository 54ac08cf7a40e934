//! Route-declared feature gates.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::OrganizationContext;
use crate::error::{ApiError, bad_request, forbidden};
use crate::repositories::feature_flag::FeatureFlagRepository;
use crate::server::AppState;

/// State for [`require_feature`]: the feature a route group depends on.
#[derive(Clone)]
pub struct FeatureGate {
    pub state: AppState,
    pub feature: &'static str,
}

impl FeatureGate {
    pub fn new(state: AppState, feature: &'static str) -> Self {
        Self { state, feature }
    }
}

/// Rejects with 403 when the organization turned the feature off.
///
/// Organizations without a row for the feature keep it enabled.
pub async fn require_feature(
    State(gate): State<FeatureGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let organization = request
        .extensions()
        .get::<OrganizationContext>()
        .copied()
        .ok_or_else(|| bad_request("Organization context missing"))?;

    let enabled = FeatureFlagRepository::new(&gate.state.db)
        .is_enabled(organization.organization_id, gate.feature)
        .await?;
    if !enabled {
        tracing::debug!(
            organization_id = %organization.organization_id,
            feature = gate.feature,
            "feature disabled"
        );
        return Err(forbidden(Some(&format!(
            "Feature {} is disabled for this organization",
            gate.feature
        ))));
    }

    Ok(next.run(request).await)
}
