//! CORS policy.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::AdmissionConfig;

pub const ORGANIZATION_HEADER: HeaderName = HeaderName::from_static("x-organization-id");
pub const DISABLE_CACHE_HEADER: HeaderName = HeaderName::from_static("x-disable-cache");

/// Origins come from a fixed allow-list and are reflected with credentials.
pub fn cors_layer(config: &AdmissionConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            ORGANIZATION_HEADER,
            DISABLE_CACHE_HEADER,
        ])
        .expose_headers([header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}
