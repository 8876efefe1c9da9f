//! JSON envelope shared by every response.
//!
//! `{ success, data | error, meta: { request_id, timestamp } }`. The
//! request id is whatever the request-id layer stamped on the request, so
//! clients and logs can be correlated.

use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Meta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub meta: Meta,
}

#[must_use]
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("req-unknown")
        .to_string()
}

fn meta(headers: &HeaderMap) -> Meta {
    Meta {
        request_id: request_id(headers),
        timestamp: Utc::now(),
    }
}

/// Success envelope with the given payload.
pub fn success<T: Serialize>(headers: &HeaderMap, status: StatusCode, data: T) -> Response {
    (
        status,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            meta: meta(headers),
        }),
    )
        .into_response()
}

/// Error envelope with a machine-readable code.
pub fn error(
    headers: &HeaderMap,
    status: StatusCode,
    code: &str,
    message: &str,
    details: Option<Value>,
) -> Response {
    (
        status,
        Json(Envelope::<Value> {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
                details,
            }),
            meta: meta(headers),
        }),
    )
        .into_response()
}
