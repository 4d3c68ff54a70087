//! Route handlers

use super::response::{
    image_response, with_header, ErrorBody, X_COMPRESSION_RATIO, X_ORIGINAL_SIZE, X_REQUEST_ID,
    X_RESULT_SIZE,
};
use super::AppState;
use crate::compress::{CompressionOptions, ImageCompressor};
use crate::config::{MaxWidth, OutputFormat};
use crate::convert::ImageConverter;
use crate::error::{Result, ToolError};
use crate::preload::ModelPreloadState;
use crate::qr::generate_qr_code;
use crate::runtime::{RuntimeState, RuntimeStatus};
use crate::tracing_config::spans;
use crate::types::{ImageBlob, RemovalJob};
use crate::utils::validate_qr_url;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Instrument;
use uuid::Uuid;

/// `POST /api/qr-code`
///
/// The body is parsed by hand so malformed JSON lands in the 500 branch
/// instead of axum's 4xx rejection.
pub async fn create_qr_code(body: Bytes) -> Response {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "QR request body is not JSON");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::internal(e.to_string())),
            )
                .into_response();
        },
    };

    let url = match validate_qr_url(payload.get("url")) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ErrorBody::new(e.to_string()))).into_response(),
    };

    match tokio::task::spawn_blocking(move || generate_qr_code(&url)).await {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::internal(e.to_string())),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::internal(format!("QR task failed: {e}"))),
        )
            .into_response(),
    }
}

/// `GET /api/qr-code`
pub async fn qr_code_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorBody::new("GET is not supported. Use POST.")),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveParams {
    pub format: Option<String>,
    pub max_width: Option<String>,
    pub filename: Option<String>,
}

/// `POST /api/remove-background`
pub async fn remove_background(
    State(state): State<AppState>,
    Query(params): Query<RemoveParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request_id = Uuid::new_v4().to_string();
    let span = spans::request(&request_id, "remove-background");

    async move {
        let format = match params.format.as_deref() {
            Some(format) => OutputFormat::from_str(format)?,
            None => state.defaults.output_format,
        };
        let max_width = match params.max_width.as_deref() {
            Some(max_width) => MaxWidth::from_str(max_width)?,
            None => MaxWidth::from(state.defaults.max_width),
        };
        let input = upload(&headers, body, params.filename);

        let job = RemovalJob::new(input)
            .output_format(format)
            .max_width(max_width);
        let result = state.remover.process(&job).await?;

        let response = image_response(result.result, &result.download_name);
        let response = with_header(response, X_ORIGINAL_SIZE, result.original_size);
        let response = with_header(response, X_RESULT_SIZE, result.result_size);
        Ok(with_header(response, X_REQUEST_ID, &request_id))
    }
    .instrument(span)
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct CompressParams {
    pub quality: Option<u8>,
    pub max_dimension: Option<u32>,
    pub filename: Option<String>,
}

/// `POST /api/compress-image`
pub async fn compress_image(
    State(state): State<AppState>,
    Query(params): Query<CompressParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request_id = Uuid::new_v4().to_string();
    let span = spans::request(&request_id, "compress-image");

    async move {
        let mut options = CompressionOptions::from(&state.image_tools);
        if let Some(quality) = params.quality {
            options = options.quality(quality);
        }
        if let Some(max_dimension) = params.max_dimension {
            options = options.max_dimension(max_dimension);
        }
        let compressor = ImageCompressor::new(options)?;
        let input = upload(&headers, body, params.filename);

        let result = tokio::task::spawn_blocking(move || compressor.compress(&input))
            .await
            .map_err(|e| ToolError::internal(format!("Compression task failed: {e}")))??;

        let response = image_response(result.result, &result.download_name);
        let response = with_header(response, X_ORIGINAL_SIZE, result.original_size);
        let response = with_header(response, X_RESULT_SIZE, result.compressed_size);
        let response = with_header(response, X_COMPRESSION_RATIO, format!("{:.1}", result.ratio));
        Ok(with_header(response, X_REQUEST_ID, &request_id))
    }
    .instrument(span)
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertParams {
    pub format: Option<String>,
    pub quality: Option<u8>,
    pub filename: Option<String>,
}

/// `POST /api/convert-image`
pub async fn convert_image(
    State(state): State<AppState>,
    Query(params): Query<ConvertParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request_id = Uuid::new_v4().to_string();
    let span = spans::request(&request_id, "convert-image");

    async move {
        let target = params
            .format
            .as_deref()
            .map_or(Ok(OutputFormat::Png), OutputFormat::from_str)?;
        let converter =
            ImageConverter::new(params.quality.unwrap_or(state.image_tools.convert_quality))?;
        let input = upload(&headers, body, params.filename);

        let result = tokio::task::spawn_blocking(move || converter.convert(&input, target))
            .await
            .map_err(|e| ToolError::internal(format!("Conversion task failed: {e}")))??;

        let download_name = result
            .file_name
            .clone()
            .unwrap_or_else(|| format!("converted.{}", target.extension()));
        let response = image_response(result, &download_name);
        Ok(with_header(response, X_REQUEST_ID, &request_id))
    }
    .instrument(span)
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeReport {
    pub state: RuntimeState,
    pub status: Option<RuntimeStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub engine: &'static str,
    pub busy: bool,
    pub progress: u8,
    pub runtime: Option<RuntimeReport>,
    pub preload: Option<ModelPreloadState>,
}

/// `GET /api/status`
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        engine: state.remover.engine().name(),
        busy: state.remover.is_busy(),
        progress: state.remover.progress(),
        runtime: state.runtime.as_ref().map(|runtime| RuntimeReport {
            state: runtime.state(),
            status: runtime.status(),
        }),
        preload: state.preloader.as_ref().map(|preloader| preloader.state()),
    })
}

/// Wrap a raw request body with its declared MIME type and file name
fn upload(headers: &HeaderMap, body: Bytes, file_name: Option<String>) -> ImageBlob {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map_or("application/octet-stream", str::trim);

    let blob = ImageBlob::new(body.to_vec(), mime_type);
    match file_name.filter(|name| !name.trim().is_empty()) {
        Some(name) => blob.with_file_name(name),
        None => blob,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_upload_strips_mime_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/png; charset=binary"),
        );
        let blob = upload(&headers, Bytes::from_static(b"png"), Some("a.png".to_string()));
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.file_name.as_deref(), Some("a.png"));

        let blob = upload(&HeaderMap::new(), Bytes::new(), Some("  ".to_string()));
        assert_eq!(blob.mime_type, "application/octet-stream");
        assert_eq!(blob.file_name, None);
    }
}
