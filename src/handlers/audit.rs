//! # Audit Log Handlers

use axum::extract::{Query, State};

use super::types::{ApiResponse, Page, PageQuery};
use crate::auth::OrganizationContext;
use crate::error::ApiError;
use crate::models::views::AuditLogView;
use crate::repositories::AuditLogRepository;
use crate::server::AppState;

/// Newest entries first
#[utoipa::path(
    get,
    path = "/api/v1/audit/logs",
    security(("bearer_auth" = [])),
    params(PageQuery),
    responses(
        (status = 200, description = "One page of audit entries", body = ApiResponse<Page<AuditLogView>>)
    ),
    tag = "audit"
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    organization: OrganizationContext,
    Query(query): Query<PageQuery>,
) -> Result<ApiResponse<Page<AuditLogView>>, ApiError> {
    let (page, page_size) = (query.page(), query.page_size());
    let (entries, total) = AuditLogRepository::new(&state.db)
        .list_for_org(organization.organization_id, page, page_size)
        .await?;
    Ok(ApiResponse::ok(
        "Audit logs fetched successfully",
        Page {
            items: entries.iter().map(AuditLogView::from).collect(),
            total,
            page,
            page_size,
        },
    ))
}
