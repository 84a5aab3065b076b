//! Progress lookups.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use mixtape_core::ProgressRecord;

use super::error::ApiError;
use crate::state::AppState;

/// Request body for a multi-identifier lookup
#[derive(Debug, Deserialize)]
pub struct ProgressQueryBody {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Records found for a multi-identifier lookup
#[derive(Debug, Serialize)]
pub struct ProgressListResponse {
    pub records: Vec<ProgressRecord>,
    /// Requested identifiers with no record
    pub unknown: Vec<String>,
}

/// Progress of one identifier
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressRecord>, ApiError> {
    state
        .service()
        .progress(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No progress for {}", id)))
}

/// Progress of several identifiers, e.g. everything in a running batch
pub async fn query_progress(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProgressQueryBody>,
) -> Json<ProgressListResponse> {
    let mut records = Vec::new();
    let mut unknown = Vec::new();
    for id in body.ids {
        match state.service().progress(&id) {
            Some(record) => records.push(record),
            None => unknown.push(id),
        }
    }
    Json(ProgressListResponse { records, unknown })
}
