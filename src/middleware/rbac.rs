//! Role-based access checks keyed by route resource and HTTP method.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::OrganizationContext;
use crate::error::{ApiError, bad_request, forbidden};
use crate::models::permission::Action;
use crate::repositories::role::RoleRepository;
use crate::server::AppState;

/// State for [`require_permission`]: the resource a route group manages.
#[derive(Clone)]
pub struct PermissionGuard {
    pub state: AppState,
    pub resource: &'static str,
}

impl PermissionGuard {
    pub fn new(state: AppState, resource: &'static str) -> Self {
        Self { state, resource }
    }
}

pub fn denial_message(action: Action, resource: &str) -> String {
    format!("User does not have permission to {action} {resource}")
}

pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let organization = request
        .extensions()
        .get::<OrganizationContext>()
        .copied()
        .ok_or_else(|| bad_request("Organization context missing"))?;
    let action = Action::from_method(request.method());

    let allowed = RoleRepository::new(&guard.state.db)
        .has_permission(organization.role_id, guard.resource, action)
        .await?;
    if !allowed {
        tracing::info!(
            role_id = %organization.role_id,
            resource = guard.resource,
            %action,
            "permission denied"
        );
        return Err(forbidden(Some(&denial_message(action, guard.resource))));
    }

    Ok(next.run(request).await)
}
