//! # User Self-Service Handlers

use axum::{extract::State, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;

use super::types::ApiResponse;
use crate::auth::Principal;
use crate::error::{ApiError, ErrorEnvelope};
use crate::models::views::{MembershipView, OrganizationView, RoleView, UserView};
use crate::repositories::{OrganizationRepository, RoleRepository, UserRepository};
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateNameRequest {
    #[schema(example = "octocat")]
    pub name: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/user",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The caller's profile", body = ApiResponse<UserView>),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope)
    ),
    tag = "users"
)]
pub async fn get_profile(principal: Principal) -> ApiResponse<UserView> {
    ApiResponse::ok("User fetched successfully", UserView::from(&principal.user))
}

#[utoipa::path(
    get,
    path = "/api/v1/user/organizations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Organizations the caller belongs to", body = ApiResponse<Vec<MembershipView>>)
    ),
    tag = "users"
)]
pub async fn list_my_organizations(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<ApiResponse<Vec<MembershipView>>, ApiError> {
    let roles = RoleRepository::new(&state.db);
    let mut views = Vec::new();
    for (org, role) in OrganizationRepository::new(&state.db)
        .list_for_user(principal.user_id())
        .await?
    {
        let permissions = roles.permissions_for_role(role.id).await?;
        views.push(MembershipView {
            organization: OrganizationView::from(&org),
            role: RoleView::new(&role, &permissions),
        });
    }
    Ok(ApiResponse::ok("Organizations fetched successfully", views))
}

#[utoipa::path(
    patch,
    path = "/api/v1/user/name",
    security(("bearer_auth" = [])),
    request_body = UpdateNameRequest,
    responses(
        (status = 200, description = "Name updated", body = ApiResponse<UserView>),
        (status = 400, description = "Empty name", body = ErrorEnvelope)
    ),
    tag = "users"
)]
pub async fn update_name(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<UpdateNameRequest>,
) -> Result<ApiResponse<UserView>, ApiError> {
    let user = UserRepository::new(&state.db)
        .update_username(principal.user, request.name)
        .await?;
    state.user_cache.invalidate(&user.id).await;
    Ok(ApiResponse::ok("User name updated successfully", UserView::from(&user)))
}
