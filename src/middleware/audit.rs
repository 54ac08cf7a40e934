//! Records mutating requests once the handler has answered.

use std::net::SocketAddr;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sea_orm::Set;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::auth::{OrganizationContext, Principal};
use crate::error::ApiError;
use crate::models::audit_log::{self, AuditAction};
use crate::repositories::audit_log::AuditLogRepository;
use crate::server::AppState;
use crate::telemetry::RequestId;

const MAX_BUFFERED_BODY: usize = 2 * 1024 * 1024;

const REDACTED_FIELDS: &[&str] = &[
    "password",
    "new_password",
    "old_password",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "secret",
    "code",
    "environment_variables",
];

/// Path segment after `/api/v1/` → audited resource type.
const RESOURCE_TYPES: &[(&str, &str)] = &[
    ("containers", "container"),
    ("feature-flags", "feature_flag"),
    ("organizations", "organization"),
    ("user", "user"),
    ("deploy", "application"),
    ("api-keys", "api_key"),
    ("audit", "audit"),
    ("auth", "user"),
];

pub fn audit_action(method: &Method) -> Option<AuditAction> {
    match *method {
        Method::POST => Some(AuditAction::Create),
        Method::PUT | Method::PATCH => Some(AuditAction::Update),
        Method::DELETE => Some(AuditAction::Delete),
        _ => None,
    }
}

pub fn resource_type(path: &str) -> String {
    let segment = path
        .trim_start_matches('/')
        .trim_start_matches("api/")
        .trim_start_matches("v1/")
        .split('/')
        .next()
        .unwrap_or_default();
    RESOURCE_TYPES
        .iter()
        .find(|(prefix, _)| *prefix == segment)
        .map(|(_, kind)| (*kind).to_string())
        .unwrap_or_else(|| segment.replace('-', "_"))
}

/// First path segment that looks like an identifier: a UUID or a
/// container-style hex id.
pub fn resource_id(path: &str) -> Option<String> {
    path.split('/')
        .find(|segment| {
            Uuid::parse_str(segment).is_ok()
                || (segment.len() >= 12 && segment.chars().all(|c| c.is_ascii_hexdigit()))
        })
        .map(str::to_string)
}

/// Parse the body as JSON and blank out credential fields.
pub fn redacted_body(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let mut value: Value = serde_json::from_slice(body).ok()?;
    redact(&mut value);
    Some(value)
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => redact_map(map),
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

fn redact_map(map: &mut Map<String, Value>) {
    for (key, value) in map.iter_mut() {
        if REDACTED_FIELDS.contains(&key.to_ascii_lowercase().as_str()) {
            *value = Value::String("[REDACTED]".into());
        } else {
            redact(value);
        }
    }
}

fn client_ip(request: &Request) -> String {
    forwarded_for(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_default()
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

struct PendingEntry {
    user_id: Uuid,
    organization_id: Uuid,
    action: AuditAction,
    method: Method,
    path: String,
    ip_address: String,
    user_agent: String,
    request_id: String,
    body: Bytes,
}

impl PendingEntry {
    fn into_active_model(self, status: StatusCode) -> audit_log::ActiveModel {
        audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(self.user_id),
            organization_id: Set(self.organization_id),
            action: Set(self.action.as_str().to_string()),
            resource_type: Set(resource_type(&self.path)),
            resource_id: Set(resource_id(&self.path)),
            old_values: Set(None),
            new_values: Set(redacted_body(&self.body)),
            metadata: Set(Some(json!({
                "status": status.as_u16(),
                "method": self.method.as_str(),
                "path": self.path,
            }))),
            ip_address: Set(self.ip_address),
            user_agent: Set(self.user_agent),
            request_id: Set(self.request_id),
            created_at: Set(Utc::now().into()),
        }
    }
}

/// Innermost stage. Reads pass straight through; for writes the body is
/// buffered so it can be both handed to the handler and recorded.
pub async fn audit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(action) = audit_action(request.method()) else {
        return next.run(request).await;
    };
    let (Some(principal), Some(organization)) = (
        request.extensions().get::<Principal>().cloned(),
        request.extensions().get::<OrganizationContext>().copied(),
    ) else {
        return next.run(request).await;
    };

    let ip_address = client_ip(&request);
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                "Request body too large",
            )
            .into_response();
        }
    };

    let pending = PendingEntry {
        user_id: principal.user_id(),
        organization_id: organization.organization_id,
        action,
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        ip_address,
        user_agent: parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        request_id: parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default(),
        body: body.clone(),
    };

    let response = next
        .run(Request::from_parts(parts, Body::from(body)))
        .await;

    let entry = pending.into_active_model(response.status());
    if let Err(err) = AuditLogRepository::new(&state.db).insert(entry).await {
        tracing::warn!(error = %err, "failed to persist audit entry");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_not_audited() {
        assert_eq!(audit_action(&Method::GET), None);
        assert_eq!(audit_action(&Method::HEAD), None);
        assert_eq!(audit_action(&Method::POST), Some(AuditAction::Create));
        assert_eq!(audit_action(&Method::PATCH), Some(AuditAction::Update));
        assert_eq!(audit_action(&Method::DELETE), Some(AuditAction::Delete));
    }

    #[test]
    fn resource_type_follows_path_prefix() {
        assert_eq!(resource_type("/api/v1/containers/abc/start"), "container");
        assert_eq!(resource_type("/api/v1/feature-flags"), "feature_flag");
        assert_eq!(
            resource_type("/api/v1/deploy/application/project/add-to-family"),
            "application"
        );
        assert_eq!(resource_type("/api/v1/api-keys/1"), "api_key");
        assert_eq!(resource_type("/api/v1/widgets"), "widgets");
    }

    #[test]
    fn resource_id_picks_identifier_segments() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(
            resource_id(&format!("/api/v1/organizations/{id}/members")),
            Some(id)
        );
        assert_eq!(
            resource_id("/api/v1/containers/4f3c2a1b9e8d7c6b/stop"),
            Some("4f3c2a1b9e8d7c6b".into())
        );
        assert_eq!(resource_id("/api/v1/containers/images/prune"), None);
    }

    #[test]
    fn credentials_are_redacted() {
        let body = br#"{"name":"ci","password":"hunter2","nested":{"api_key":"nixopus_x"},"items":[{"token":"t"}]}"#;
        let value = redacted_body(body).unwrap();
        assert_eq!(value["name"], "ci");
        assert_eq!(value["password"], "[REDACTED]");
        assert_eq!(value["nested"]["api_key"], "[REDACTED]");
        assert_eq!(value["items"][0]["token"], "[REDACTED]");
    }

    #[test]
    fn non_json_bodies_are_dropped() {
        assert_eq!(redacted_body(b""), None);
        assert_eq!(redacted_body(b"not json"), None);
    }
}
