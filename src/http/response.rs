//! Responses the pipeline produces on its own behalf.
//!
//! # Responsibilities
//! - Render request-filter failures as a structured 400
//! - Render upstream and modifier failures as 502
//!
//! # Design Decisions
//! - The error body is JSON: `{"success": false, "message": <reason>, "error": <message>}`
//! - Upstream error detail is logged, never sent to the client

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::filter::FilterError;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    error: &'a str,
}

fn json_error(status: StatusCode, error: &str) -> Response<Body> {
    let body = ErrorBody {
        success: false,
        message: status.canonical_reason().unwrap_or_default(),
        error,
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_default();

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// The 400 sent when a request filter fails.
pub fn filter_error_response(err: &FilterError) -> Response<Body> {
    json_error(StatusCode::BAD_REQUEST, err.message())
}

/// The 502 sent when the round trip or a response modifier fails.
pub fn bad_gateway() -> Response<Body> {
    let mut response = Response::new(Body::from("Upstream request failed"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}
