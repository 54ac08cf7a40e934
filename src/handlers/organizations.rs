//! # Organization Handlers
//!
//! The organization in context, its members and the role catalogue. Every
//! membership mutation invalidates the membership cache.

use axum::{
    extract::{Path, State},
    response::{Json, Response},
};
use sea_orm::TransactionTrait;
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::{ApiResponse, MessageResponse, created};
use crate::auth::{OrganizationContext, Principal};
use crate::error::{ApiError, ErrorEnvelope, bad_request, conflict, not_found};
use crate::models::permission::Action;
use crate::models::views::{MemberView, OrganizationView, PermissionView, RoleView, UserView};
use crate::notifications::Notification;
use crate::repositories::organization::{CreateOrganizationRequest, UpdateOrganizationRequest};
use crate::repositories::{OrganizationRepository, RoleRepository, UserRepository};
use crate::seeds::ADMIN_ROLE;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrganizationDto {
    #[schema(example = "Acme")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrganizationDto {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the settings object, e.g. `container_stop_timeout`
    #[schema(value_type = Option<Object>)]
    pub settings: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMemberRequest {
    pub email: String,
    #[schema(example = "member")]
    pub role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionGrant {
    #[schema(example = "container")]
    pub resource: String,
    pub action: Action,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPermissionsRequest {
    pub permissions: Vec<PermissionGrant>,
}

/// Create an organization; the caller becomes its admin
#[utoipa::path(
    post,
    path = "/api/v1/organizations",
    security(("bearer_auth" = [])),
    request_body = CreateOrganizationDto,
    responses(
        (status = 201, description = "Organization created", body = ApiResponse<OrganizationView>),
        (status = 400, description = "Validation failed or name taken", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn create_organization(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreateOrganizationDto>,
) -> Result<Response, ApiError> {
    let txn = state.db.begin().await?;
    let org = OrganizationRepository::new(&txn)
        .create(CreateOrganizationRequest {
            name: request.name,
            description: request.description,
            settings: None,
        })
        .await?;
    let admin = RoleRepository::new(&txn).require_by_name(ADMIN_ROLE).await?;
    OrganizationRepository::new(&txn)
        .add_member(org.id, principal.user_id(), admin.id)
        .await?;
    txn.commit().await?;

    state
        .membership_cache
        .invalidate_membership(principal.user_id(), org.id)
        .await;
    tracing::info!(organization_id = %org.id, user_id = %principal.user_id(), "organization created");
    Ok(created(
        "Organization created successfully",
        OrganizationView::from(&org),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/organizations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The organization in context", body = ApiResponse<OrganizationView>)
    ),
    tag = "organizations"
)]
pub async fn get_organization(
    State(state): State<AppState>,
    organization: OrganizationContext,
) -> Result<ApiResponse<OrganizationView>, ApiError> {
    let org = OrganizationRepository::new(&state.db)
        .require(organization.organization_id)
        .await?;
    Ok(ApiResponse::ok(
        "Organization fetched successfully",
        OrganizationView::from(&org),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/organizations",
    security(("bearer_auth" = [])),
    request_body = UpdateOrganizationDto,
    responses(
        (status = 200, description = "Organization updated", body = ApiResponse<OrganizationView>),
        (status = 400, description = "Validation failed or name taken", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn update_organization(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Json(request): Json<UpdateOrganizationDto>,
) -> Result<ApiResponse<OrganizationView>, ApiError> {
    let org = OrganizationRepository::new(&state.db)
        .update(
            organization.organization_id,
            UpdateOrganizationRequest {
                name: request.name,
                description: request.description,
                settings: request.settings,
            },
        )
        .await?;
    Ok(ApiResponse::ok(
        "Organization updated successfully",
        OrganizationView::from(&org),
    ))
}

/// Delete the organization once the caller is its last member
#[utoipa::path(
    delete,
    path = "/api/v1/organizations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Organization deleted", body = MessageResponse),
        (status = 400, description = "Other members remain", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn delete_organization(
    State(state): State<AppState>,
    principal: Principal,
    organization: OrganizationContext,
) -> Result<ApiResponse<()>, ApiError> {
    let org_id = organization.organization_id;
    let txn = state.db.begin().await?;
    let repo = OrganizationRepository::new(&txn);
    let others = repo
        .members(org_id)
        .await?
        .into_iter()
        .any(|member| member.user.id != principal.user_id());
    if others {
        return Err(conflict("organization still has members"));
    }
    repo.remove_member(org_id, principal.user_id()).await?;
    repo.delete_if_empty(org_id).await?;
    txn.commit().await?;

    state.membership_cache.invalidate_organization(org_id).await;
    tracing::info!(organization_id = %org_id, "organization deleted");
    Ok(ApiResponse::message("Organization deleted successfully"))
}

#[utoipa::path(
    get,
    path = "/api/v1/organizations/members",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Members and their roles", body = ApiResponse<Vec<MemberView>>)
    ),
    tag = "organizations"
)]
pub async fn list_members(
    State(state): State<AppState>,
    organization: OrganizationContext,
) -> Result<ApiResponse<Vec<MemberView>>, ApiError> {
    let members = OrganizationRepository::new(&state.db)
        .members(organization.organization_id)
        .await?
        .into_iter()
        .map(|member| MemberView {
            user: (&member.user).into(),
            role: member.role.name,
            joined_at: member.membership.created_at.with_timezone(&chrono::Utc),
        })
        .collect();
    Ok(ApiResponse::ok("Members fetched successfully", members))
}

#[utoipa::path(
    post,
    path = "/api/v1/organizations/members",
    security(("bearer_auth" = [])),
    request_body = AddMemberRequest,
    responses(
        (status = 201, description = "Member added", body = ApiResponse<UserView>),
        (status = 400, description = "Already a member or unknown role", body = ErrorEnvelope),
        (status = 404, description = "No user with that email", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn add_member(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Json(request): Json<AddMemberRequest>,
) -> Result<Response, ApiError> {
    let user = UserRepository::new(&state.db)
        .find_by_email(&request.email)
        .await?
        .ok_or_else(|| not_found("User not found"))?;
    let role = RoleRepository::new(&state.db)
        .find_by_name(request.role.trim())
        .await?
        .ok_or_else(|| bad_request("Unknown role"))?;
    let repo = OrganizationRepository::new(&state.db);
    let org = repo.require(organization.organization_id).await?;
    repo.add_member(org.id, user.id, role.id).await?;

    state
        .membership_cache
        .invalidate_membership(user.id, org.id)
        .await;
    state.notifications.enqueue(Notification::OrganizationInvite {
        email: user.email.clone(),
        organization: org.name.clone(),
        role: role.name.clone(),
    });
    Ok(created("Member added successfully", UserView::from(&user)))
}

#[utoipa::path(
    put,
    path = "/api/v1/organizations/members/{user_id}/role",
    security(("bearer_auth" = [])),
    params(("user_id" = Uuid, Path, description = "Member's user id")),
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = MessageResponse),
        (status = 404, description = "Not a member", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn change_member_role(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ChangeRoleRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    let role = RoleRepository::new(&state.db)
        .find_by_name(request.role.trim())
        .await?
        .ok_or_else(|| bad_request("Unknown role"))?;
    OrganizationRepository::new(&state.db)
        .change_role(organization.organization_id, user_id, role.id)
        .await?;
    state
        .membership_cache
        .invalidate_membership(user_id, organization.organization_id)
        .await;
    Ok(ApiResponse::message("Member role updated successfully"))
}

#[utoipa::path(
    delete,
    path = "/api/v1/organizations/members/{user_id}",
    security(("bearer_auth" = [])),
    params(("user_id" = Uuid, Path, description = "Member's user id")),
    responses(
        (status = 200, description = "Member removed", body = MessageResponse),
        (status = 404, description = "Not a member", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn remove_member(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Path(user_id): Path<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    OrganizationRepository::new(&state.db)
        .remove_member(organization.organization_id, user_id)
        .await?;
    state
        .membership_cache
        .invalidate_membership(user_id, organization.organization_id)
        .await;
    state.api_keys.cache().invalidate_user(user_id).await;
    Ok(ApiResponse::message("Member removed successfully"))
}

#[utoipa::path(
    get,
    path = "/api/v1/organizations/roles",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Roles with their permissions", body = ApiResponse<Vec<RoleView>>)
    ),
    tag = "organizations"
)]
pub async fn list_roles(State(state): State<AppState>) -> Result<ApiResponse<Vec<RoleView>>, ApiError> {
    let repo = RoleRepository::new(&state.db);
    let mut views = Vec::new();
    for role in repo.list().await? {
        let permissions = repo.permissions_for_role(role.id).await?;
        views.push(RoleView::new(&role, &permissions));
    }
    Ok(ApiResponse::ok("Roles fetched successfully", views))
}

/// Replace a role's permission set
#[utoipa::path(
    put,
    path = "/api/v1/organizations/roles/{role_id}/permissions",
    security(("bearer_auth" = [])),
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = SetPermissionsRequest,
    responses(
        (status = 200, description = "Permissions replaced", body = ApiResponse<Vec<PermissionView>>),
        (status = 403, description = "Only administrators may edit roles", body = ErrorEnvelope),
        (status = 404, description = "Unknown role", body = ErrorEnvelope)
    ),
    tag = "organizations"
)]
pub async fn set_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<Uuid>,
    Json(request): Json<SetPermissionsRequest>,
) -> Result<ApiResponse<Vec<PermissionView>>, ApiError> {
    let repo = RoleRepository::new(&state.db);
    repo.find_by_id(role_id)
        .await?
        .ok_or_else(|| not_found("Role not found"))?;
    if request
        .permissions
        .iter()
        .any(|grant| grant.resource.trim().is_empty())
    {
        return Err(bad_request("resource is required"));
    }

    let grants: Vec<(String, Action)> = request
        .permissions
        .into_iter()
        .map(|grant| (grant.resource.trim().to_string(), grant.action))
        .collect();
    let txn = state.db.begin().await?;
    let permissions = RoleRepository::new(&txn)
        .set_permissions(role_id, &grants)
        .await?;
    txn.commit().await?;

    tracing::info!(%role_id, count = permissions.len(), "role permissions replaced");
    Ok(ApiResponse::ok(
        "Role permissions updated successfully",
        permissions.iter().map(PermissionView::from).collect(),
    ))
}
