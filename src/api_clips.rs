use std::path::Path;
use std::sync::LazyLock;

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;

use crate::errors::{Result, ViewerError};
use crate::AppState;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Only canonical clip and thumbnail names are servable.
static SERVE_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^falcon_\d{6}_(arrival|departure|visit)\.(mp4|jpg)$").unwrap()
});

/// GET /api/clips/:stream_id/:date/:filename
///
/// Date and filename are validated against fixed grammars before any path
/// is built, and the resolved path must stay inside the stream's clips
/// directory.
pub async fn serve_clip(
    State(state): State<AppState>,
    AxumPath((stream_id, date, filename)): AxumPath<(String, String, String)>,
) -> Result<Response> {
    let stream = state.registry.resolve(&stream_id).await?;

    if !DATE_RE.is_match(&date) {
        return Err(ViewerError::bad_request("Invalid date format"));
    }
    if !SERVE_FILENAME_RE.is_match(&filename) {
        return Err(ViewerError::bad_request("Invalid filename"));
    }

    let clips_dir = stream.clips_dir();
    let file_path = clips_dir.join(&date).join(&filename);

    if !file_path.is_file() {
        return Err(ViewerError::not_found("File not found"));
    }
    // Catches symlinked escapes the filename grammar cannot
    if !is_safe_path(&clips_dir, &file_path) {
        return Err(ViewerError::forbidden("Access denied"));
    }

    let data = tokio::fs::read(&file_path).await?;

    let content_type = if filename.ends_with(".mp4") {
        "video/mp4"
    } else {
        "image/jpeg"
    };

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", content_type.parse().unwrap());
    headers.insert("Content-Length", data.len().to_string().parse().unwrap());
    headers.insert(
        "Content-Disposition",
        format!("inline; filename=\"{}\"", filename).parse().unwrap(),
    );

    Ok((StatusCode::OK, headers, data).into_response())
}

/// True when `requested` resolves to a path under `base`.
fn is_safe_path(base: &Path, requested: &Path) -> bool {
    match (base.canonicalize(), requested.canonicalize()) {
        (Ok(base_resolved), Ok(requested_resolved)) => {
            requested_resolved.starts_with(&base_resolved)
        }
        _ => false,
    }
}
