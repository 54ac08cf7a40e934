//! # API Handlers
//!
//! HTTP endpoint handlers for the Nixopus control plane. Admission checks run
//! in middleware before any of these are reached.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod api_keys;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod containers;
pub mod deploy;
pub mod device;
pub mod feature_flags;
pub mod health;
pub mod organizations;
pub mod types;
pub mod users;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}
