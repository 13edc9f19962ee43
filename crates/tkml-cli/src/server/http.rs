// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP server for TKML documents.
//!
//! This is a thin adapter that converts HTTP requests to `TkmlRequest`,
//! runs a `RequestOrchestrator`, and converts `TkmlResponse` back to HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tkml::{RequestOrchestrator, TkmlRequest, TkmlResponse};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use super::static_files::{content_type_for, serve_static};
use super::AppState;

const MAX_BODY_SIZE: usize = 1024 * 1024;

/// CORS headers carried by every rendered response.
const CORS_HEADERS: &[(&str, &str)] = &[
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, OPTIONS"),
    ("access-control-allow-headers", "Content-Type, Accept"),
];

/// Builds the application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Creates and starts the HTTP server.
pub async fn create_server(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(*name, HeaderValue::from_static(value));
    }
    response
}

/// Main fallback handler: preflight, static assets, then documents.
async fn fallback_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    if parts.method == Method::OPTIONS {
        let mut response = with_cors(StatusCode::NO_CONTENT.into_response());
        response
            .headers_mut()
            .insert("access-control-max-age", HeaderValue::from_static("86400"));
        return response;
    }

    if parts.method != Method::GET && parts.method != Method::POST {
        return with_cors((StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response());
    }

    if !state.engine.normalizer().is_document_path(&path) {
        if let Some(content_type) = content_type_for(&path) {
            return serve_static(&state, &path, content_type).await;
        }
    }

    let body_bytes = if parts.method == Method::POST {
        match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(_) => {
                return with_cors((StatusCode::BAD_REQUEST, "Body too large").into_response());
            }
        }
    } else {
        None
    };

    let request = to_tkml_request(&path, &parts.method, parts.uri.query(), &parts.headers, body_bytes);
    debug!(method = %parts.method, path = %path, "rendering");

    let orchestrator = RequestOrchestrator::new(
        state.engine.clone(),
        state.compiler.clone(),
        state.template(),
        request,
    );
    with_cors(tkml_response_to_axum(orchestrator.handle().await))
}

/// Convert axum request parts to a TkmlRequest
fn to_tkml_request(
    path: &str,
    method: &Method,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Option<Vec<u8>>,
) -> TkmlRequest {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    let mut request = TkmlRequest::new(path, method.as_str())
        .with_query(tkml::body::parse_query(query.unwrap_or_default()))
        .with_headers(headers);

    if let Some(body) = body {
        request = request.with_body(body);
    }

    request
}

/// Convert TkmlResponse to axum Response
fn tkml_response_to_axum(response: TkmlResponse) -> Response {
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, response.content_type());

    if let Some(headers) = response.headers() {
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    match builder.body(Body::from(response.body().to_string())) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "could not build response");
            (StatusCode::INTERNAL_SERVER_ERROR, tkml::orchestrator::SERVER_ERROR_BODY).into_response()
        }
    }
}
