//! HTTP responses for tool results and errors

use crate::error::ToolError;
use crate::types::ImageBlob;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub const X_ORIGINAL_SIZE: HeaderName = HeaderName::from_static("x-original-size");
pub const X_RESULT_SIZE: HeaderName = HeaderName::from_static("x-result-size");
pub const X_COMPRESSION_RATIO: HeaderName = HeaderName::from_static("x-compression-ratio");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new<S: Into<String>>(error: S) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Generic 500 body carrying the underlying message as details
    pub fn internal<S: Into<String>>(details: S) -> Self {
        Self {
            error: "Internal server error".to_string(),
            details: Some(details.into()),
        }
    }
}

/// Status code for a tool error
///
/// Validation is the caller's fault, busy is a conflict, anything that went
/// wrong while working on a valid image is unprocessable, the rest is ours.
#[must_use]
pub fn status_for(error: &ToolError) -> StatusCode {
    match error {
        ToolError::Validation(_) => StatusCode::BAD_REQUEST,
        ToolError::Busy => StatusCode::CONFLICT,
        ToolError::Decode(_)
        | ToolError::Encode(_)
        | ToolError::Image(_)
        | ToolError::Inference { .. }
        | ToolError::InvalidResult(_)
        | ToolError::Runtime(_)
        | ToolError::Model(_)
        | ToolError::Network(_)
        | ToolError::Timeout(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ToolError::Io(_) | ToolError::InvalidConfig(_) | ToolError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            ErrorBody::internal(self.to_string())
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            ErrorBody::new(self.to_string())
        };
        (status, Json(body)).into_response()
    }
}

/// `200` image response offered as a download
pub fn image_response(blob: ImageBlob, download_name: &str) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", download_name.replace('"', ""));
    let mut response = (StatusCode::OK, blob.bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&blob.mime_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// Add a header whose value is known to be valid ASCII
pub fn with_header(mut response: Response, name: HeaderName, value: impl ToString) -> Response {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceFailure;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ToolError::validation("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ToolError::Busy), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&ToolError::inference(InferenceFailure::Other, "x")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ToolError::internal("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_image_response_headers() {
        let response = image_response(
            ImageBlob::new(vec![1, 2], "image/png"),
            "photo-transparent.png",
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"photo-transparent.png\""
        );
    }
}
