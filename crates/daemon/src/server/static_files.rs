// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static dashboard files under `/workspace/{id}/…`.
//!
//! The dashboard bundle is one directory shared by all workspaces; the
//! workspace segment only scopes the URLs so relative assets resolve.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{decode_workspace, ApiError, ServerState};

pub async fn serve(
    State(state): State<ServerState>,
    Path((ws, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    // Validate the workspace segment even though the bundle is shared;
    // garbage URLs should 400, not 404.
    decode_workspace(&ws)?;

    let Some(static_dir) = &state.static_dir else {
        return Err(ApiError::NotFound("no dashboard bundle configured".to_string()));
    };

    let rel = if path.is_empty() { "index.html" } else { path.as_str() };
    if rel.split('/').any(|seg| seg == "..") {
        return Err(ApiError::Invalid("invalid path".to_string()));
    }

    let full = static_dir.join(rel);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&full).first_or_octet_stream();
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                bytes,
            )
                .into_response())
        }
        Err(_) => Err(ApiError::NotFound(format!("no such asset: {rel}"))),
    }
}
