//! HTTP handlers

pub mod health;
pub mod history;
pub mod map_analysis;
pub mod tasks;

use axum::http::{header, HeaderMap};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Absolute URL of a file served from the static root
pub(crate) fn absolute_url(state: &AppState, headers: &HeaderMap, relative: &str) -> String {
    let base = match &state.config.server.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{}", host)
        }
    };
    format!("{}/{}", base, relative.trim_start_matches('/'))
}

/// A file in the temp directory, removed when dropped unless kept
pub(crate) struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the file in place and return its path
    pub(crate) fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Resolve a client-supplied upload path, which must point into the temp directory
pub(crate) fn resolve_upload(state: &AppState, raw: Option<&str>, field: &str) -> Result<PathBuf, ApiError> {
    let raw = raw
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing image path '{}'", field)))?;

    let temp_dir = state
        .config
        .paths
        .temp_dir
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("Upload directory unavailable: {}", e)))?;
    let candidate = Path::new(raw)
        .canonicalize()
        .map_err(|_| ApiError::BadRequest(format!("Image not found: {}", raw)))?;

    if !candidate.starts_with(&temp_dir) || !candidate.is_file() {
        return Err(ApiError::BadRequest(format!(
            "Image path must refer to an uploaded file: {}",
            raw
        )));
    }
    Ok(candidate)
}
