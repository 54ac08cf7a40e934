//! Binds a request to the organization it acts within.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use super::authenticate::cache_disabled;
use super::cors::ORGANIZATION_HEADER;
use crate::auth::{OrganizationContext, Principal};
use crate::error::{ApiError, bad_request, forbidden, unauthorized};
use crate::repositories::organization::OrganizationRepository;
use crate::server::AppState;

/// Authenticated endpoints that run without an organization.
pub const ORGANIZATION_EXEMPT_PATHS: &[&str] = &[
    "/api/v1/auth/logout",
    "/api/v1/auth/setup-2fa",
    "/api/v1/auth/verify-2fa",
    "/api/v1/auth/disable-2fa",
    "/api/v1/auth/send-verification",
    "/api/v1/user",
    "/api/v1/user/organizations",
    "/api/v1/user/name",
    "/api/auth/device/approve",
    "/api/auth/device/deny",
];

pub const NOT_A_MEMBER: &str = "User does not belong to the specified organization";

pub fn is_exempt(method: &Method, path: &str) -> bool {
    let path = path.trim_end_matches('/');
    ORGANIZATION_EXEMPT_PATHS.contains(&path)
        || (*method == Method::POST && path == "/api/v1/organizations")
}

fn header_organization(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(ORGANIZATION_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| bad_request("Invalid organization id"))?
        .trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(raw)
        .map(Some)
        .map_err(|_| bad_request("Invalid organization id"))
}

/// Decide which organization the request targets.
///
/// API keys carry their own organization; a conflicting header is refused.
pub fn resolve_organization(
    principal: &Principal,
    headers: &HeaderMap,
) -> Result<Uuid, ApiError> {
    let requested = header_organization(headers)?;
    match (principal.bound_organization(), requested) {
        (Some(bound), Some(requested)) if bound != requested => Err(forbidden(Some(NOT_A_MEMBER))),
        (Some(bound), _) => Ok(bound),
        (None, Some(requested)) => Ok(requested),
        (None, None) => Err(bad_request("Organization ID is required")),
    }
}

/// Role the user holds in the organization, through the membership cache.
pub async fn member_role(
    state: &AppState,
    user_id: Uuid,
    organization_id: Uuid,
    bypass: bool,
) -> Result<Option<Uuid>, ApiError> {
    let key = (user_id, organization_id);
    if !bypass && let Some(cached) = state.membership_cache.get(&key).await {
        return Ok(cached);
    }

    let role_id = OrganizationRepository::new(&state.db)
        .membership(user_id, organization_id)
        .await?
        .map(|membership| membership.role_id);
    state.membership_cache.insert(key, role_id).await;
    Ok(role_id)
}

pub async fn bind_organization(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_exempt(request.method(), request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| unauthorized(Some("Authentication required")))?;
    let organization_id = resolve_organization(&principal, request.headers())?;
    let bypass = cache_disabled(request.headers());

    let role_id = member_role(&state, principal.user_id(), organization_id, bypass)
        .await?
        .ok_or_else(|| forbidden(Some(NOT_A_MEMBER)))?;

    request.extensions_mut().insert(OrganizationContext {
        organization_id,
        role_id,
    });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMode;
    use crate::models::user;
    use axum::http::{HeaderValue, StatusCode};
    use chrono::Utc;

    fn principal(mode: AuthMode) -> Principal {
        let now = Utc::now().into();
        Principal {
            user: user::Model {
                id: Uuid::new_v4(),
                email: "dev@example.com".into(),
                username: "dev".into(),
                password_hash: String::new(),
                user_type: "user".into(),
                is_verified: true,
                two_factor_enabled: false,
                two_factor_secret: None,
                reset_token_hash: None,
                reset_token_expires_at: None,
                verification_token_hash: None,
                verification_token_expires_at: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            mode,
        }
    }

    fn with_org(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORGANIZATION_HEADER, HeaderValue::from_str(id).unwrap());
        headers
    }

    #[test]
    fn exempt_paths_match_exactly() {
        assert!(is_exempt(&Method::POST, "/api/v1/auth/logout"));
        assert!(is_exempt(&Method::GET, "/api/v1/user/"));
        assert!(is_exempt(&Method::POST, "/api/v1/organizations"));
        assert!(!is_exempt(&Method::GET, "/api/v1/organizations"));
        assert!(!is_exempt(&Method::GET, "/api/v1/containers"));
        assert!(!is_exempt(&Method::GET, "/api/v1/user/other"));
    }

    #[test]
    fn session_requires_header() {
        let err = resolve_organization(&principal(AuthMode::Session), &HeaderMap::new()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = resolve_organization(&principal(AuthMode::Session), &with_org("nope")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let org = Uuid::new_v4();
        assert_eq!(
            resolve_organization(&principal(AuthMode::Session), &with_org(&org.to_string())).unwrap(),
            org
        );
    }

    #[test]
    fn api_key_adopts_its_organization() {
        let bound = Uuid::new_v4();
        let key = principal(AuthMode::ApiKey {
            key_id: Uuid::new_v4(),
            organization_id: bound,
        });
        assert_eq!(resolve_organization(&key, &HeaderMap::new()).unwrap(), bound);
        assert_eq!(
            resolve_organization(&key, &with_org(&bound.to_string())).unwrap(),
            bound
        );

        let err = resolve_organization(&key, &with_org(&Uuid::new_v4().to_string())).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(&*err.message, NOT_A_MEMBER);
    }
}
