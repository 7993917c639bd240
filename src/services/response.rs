//! HTTP response building helpers
//!
//! Every handler builds its response through these helpers so that error bodies always
//! have the `{"detail", "error_code", ...}` shape.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::error;

use crate::error::{ErrorCode, IntakeError};

/// Build a response from raw JSON bytes
pub fn json_bytes_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    json_bytes_response(status, Bytes::from(json))
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build an error body with a stable code and optional extra fields
pub fn error_body(code: ErrorCode, detail: &str, extra: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("detail".to_string(), Value::String(detail.to_string()));
    body.insert("error_code".to_string(), json!(code));
    body.extend(extra);
    Value::Object(body)
}

/// Status code an error maps to
pub fn error_status(error: &IntakeError) -> StatusCode {
    match error {
        IntakeError::Invalid { .. } => StatusCode::BAD_REQUEST,
        IntakeError::Conflict { .. } => StatusCode::CONFLICT,
        IntakeError::NotFound(_) => StatusCode::NOT_FOUND,
        IntakeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        IntakeError::TooManyItems { .. } | IntakeError::EmptyBatch => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert an IntakeError to an HTTP response
pub fn error_response(error: &IntakeError) -> Response<Full<Bytes>> {
    error_response_with(error, Map::new())
}

/// Convert an IntakeError to an HTTP response, adding extra body fields
pub fn error_response_with(error: &IntakeError, mut extra: Map<String, Value>) -> Response<Full<Bytes>> {
    let status = error_status(error);

    let detail = match error {
        IntakeError::PayloadTooLarge { max, .. } => {
            extra.insert("max_size_bytes".to_string(), json!(max));
            error.to_string()
        }
        IntakeError::TooManyItems { max, .. } => {
            extra.insert("max_items".to_string(), json!(max));
            error.to_string()
        }
        _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
            error!(error = %error, "Request failed");
            "Internal server error".to_string()
        }
        _ => error.to_string(),
    };

    json_response(status, &error_body(error.code(), &detail, extra))
}

/// 404 for paths no route matches
pub fn route_not_found() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &error_body(ErrorCode::NotFound, "Not found", Map::new()),
    )
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({ "detail": "Method not allowed" }),
    )
}

/// Build a 503 Service Unavailable response with message
pub fn service_unavailable(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({ "status": "not_ready", "detail": message }),
    )
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, IntakeError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(&e),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(result: Result<T, IntakeError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(&e),
    }
}
