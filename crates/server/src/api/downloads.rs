//! Listing and download handlers.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use mixtape_core::{AcquisitionRequest, BatchDownload, ExtractorError, MediaEntry};

use super::error::ApiError;
use crate::metrics::DOWNLOAD_STREAMS_ACTIVE;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

/// Request body for listing a URL
#[derive(Debug, Deserialize)]
pub struct ListBody {
    pub url: Option<String>,
}

/// Query parameters for a single download
#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    /// Known media duration in seconds, used to size the deadline
    pub duration: Option<f64>,
}

/// Request body for a batch download
#[derive(Debug, Deserialize)]
pub struct DownloadAllBody {
    #[serde(default)]
    pub ids: Vec<String>,
    /// Known durations in seconds, keyed by identifier
    #[serde(default)]
    pub durations: HashMap<String, f64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the media behind a URL (single item or playlist)
pub async fn list(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ListBody>,
) -> Result<Json<Vec<MediaEntry>>, ApiError> {
    let url = body
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing URL"))?;

    match state.service().list(&url).await {
        Ok(entries) => Ok(Json(entries)),
        Err(e @ ExtractorError::ProgramNotFound { .. }) => {
            tracing::error!(url = %url, error = %e, "Extractor unavailable");
            Err(ApiError::internal(e.to_string()))
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Listing failed");
            Err(ApiError::bad_gateway(e.to_string()))
        }
    }
}

/// Acquire one identifier and stream the audio file
pub async fn download_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let request = AcquisitionRequest::new(id.clone()).with_duration(params.duration);

    let download = state.service().download_one(request).await.map_err(|e| {
        tracing::warn!(identifier = %id, error = %e, "Single download failed");
        ApiError::internal(e.to_string())
    })?;

    Ok(stream_response(download))
}

/// Acquire many identifiers and stream them as one zip archive
pub async fn download_all(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadAllBody>,
) -> Result<Response, ApiError> {
    let ids: Vec<String> = body
        .ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(ApiError::bad_request("No IDs provided"));
    }

    let requests = ids
        .into_iter()
        .map(|id| {
            let duration = body.durations.get(&id).copied();
            AcquisitionRequest::new(id).with_duration(duration)
        })
        .collect();

    let download = state
        .service()
        .download_batch(requests)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Batch could not start");
            ApiError::internal(e.to_string())
        })?;

    Ok(stream_response(download))
}

// ============================================================================
// Helpers
// ============================================================================

/// Turn a running download into a streamed attachment response.
///
/// The outcome is awaited in the background so the result is logged even
/// when the client goes away mid-stream.
fn stream_response(download: BatchDownload) -> Response {
    let batch_id = download.batch_id();
    let disposition = content_disposition(download.file_name());
    let content_type = download.content_type();
    let (stream, outcome) = download.into_parts();

    DOWNLOAD_STREAMS_ACTIVE.inc();
    tokio::spawn(async move {
        match outcome.wait().await {
            Ok(report) => tracing::info!(
                batch_id = %batch_id,
                entries = report.entries.len(),
                failures = report.failures.len(),
                bytes = report.bytes_streamed,
                "Download delivered"
            ),
            Err(e) => tracing::warn!(batch_id = %batch_id, error = %e, "Download not delivered"),
        }
        DOWNLOAD_STREAMS_ACTIVE.dec();
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition"),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// `attachment` disposition with a header-safe file name.
pub fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let safe = if safe.is_empty() { "download".to_string() } else { safe };
    format!("attachment; filename=\"{}\"", safe)
}
