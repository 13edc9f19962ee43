// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Static assets served from the document root.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::AppState;

/// Extension to content type for static assets.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("css", "text/css"),
    ("html", "text/html; charset=utf-8"),
    ("json", "application/json"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("txt", "text/plain; charset=utf-8"),
    ("map", "application/json"),
];

/// Content type of a static asset path, or `None` when the path is not a
/// static asset.
pub fn content_type_for(path: &str) -> Option<&'static str> {
    let name = path.rsplit('/').next()?;
    let (_, extension) = name.rsplit_once('.')?;
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, content_type)| *content_type)
}

/// Serves `path` from the document root.
pub async fn serve_static(state: &AppState, path: &str, content_type: &'static str) -> Response {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("File not found: {}", path),
        )
            .into_response()
    };

    let id = match state.engine.normalizer().asset_path(path) {
        Ok(id) => id,
        Err(e) => {
            debug!(path = %path, error = %e, "rejected asset path");
            return not_found();
        }
    };

    match tokio::fs::read(state.source.path_of(&id)).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(
                header::CACHE_CONTROL,
                format!("max-age={}", state.config.server.static_max_age),
            )
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
        Err(e) => {
            warn!(path = %path, error = %e, "could not read static asset");
            (StatusCode::INTERNAL_SERVER_ERROR, "Server Error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type_for("/assets/app.js"), Some("application/javascript"));
        assert_eq!(content_type_for("/logo.PNG"), Some("image/png"));
        assert_eq!(content_type_for("/fonts/a.woff2"), Some("font/woff2"));
        assert_eq!(content_type_for("/index.tkml"), None);
        assert_eq!(content_type_for("/docs/"), None);
        assert_eq!(content_type_for("/v1.2/page"), None);
    }
}
