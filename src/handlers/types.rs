//! # Common API Types
//!
//! The `{status, message, data}` envelope shared by every JSON endpoint
//! except the device-grant token exchange.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Successful response envelope
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Always `"success"`
    #[schema(example = "success")]
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Envelope with a message and no payload
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Documented shape of [`ApiResponse::message`]
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "success")]
    pub status: String,
    pub message: String,
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
}

/// `201 Created` with the envelope
pub fn created<T: Serialize>(message: &str, data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::ok(message, data))).into_response()
}

/// 1-based page selection for list endpoints
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Page number, starting at 1
    pub page: Option<u64>,
    /// Items per page (1-100, default 20)
    pub page_size: Option<u64>,
}

impl PageQuery {
    pub const DEFAULT_PAGE_SIZE: u64 = 20;
    pub const MAX_PAGE_SIZE: u64 = 100;

    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .clamp(1, Self::MAX_PAGE_SIZE)
    }
}

/// One page of items with the overall count
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_clamps() {
        let query = PageQuery {
            page: Some(0),
            page_size: Some(500),
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), 100);

        let defaults = PageQuery {
            page: None,
            page_size: None,
        };
        assert_eq!(defaults.page_size(), 20);
    }

    #[test]
    fn message_envelope_has_null_data() {
        let value = serde_json::to_value(ApiResponse::message("done")).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["message"], "done");
        assert!(value["data"].is_null());
    }
}
