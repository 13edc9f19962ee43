// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP request abstraction for the TKML renderer.
//!
//! Adapters (the HTTP server, the `render` command) build a [`TkmlRequest`]
//! and hand it to the orchestrator, which never sees framework types.

use crate::body::form_params_or_empty;
use crate::context::Params;
use std::collections::HashMap;

/// Media type of raw TKML markup.
pub const TKML_MEDIA_TYPE: &str = "application/tkml";

/// A platform-agnostic HTTP request.
///
/// # Example
///
/// ```rust
/// use tkml::TkmlRequest;
///
/// let request = TkmlRequest::new("/blog/", "GET")
///     .with_query([("page".into(), "1".into())].into());
/// assert!(!request.wants_raw_markup());
/// ```
#[derive(Debug, Clone)]
pub struct TkmlRequest {
    /// The request path (e.g., "/blog/")
    pub path: String,

    /// The HTTP method (e.g., "GET", "POST")
    pub method: String,

    /// HTTP headers, keys lowercased
    pub headers: HashMap<String, String>,

    /// Request body (for POST)
    pub body: Option<Vec<u8>>,

    /// Query parameters (parsed from URL)
    pub query: Params,
}

impl TkmlRequest {
    /// Creates a new request with the given path and method.
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            headers: HashMap::new(),
            body: None,
            query: Params::new(),
        }
    }

    /// Adds headers to the request. Header names are lowercased.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self
    }

    /// Sets a single header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Adds a body to the request.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds query parameters to the request.
    pub fn with_query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Returns the Content-Type header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// True when the `Accept` header names the raw markup media type.
    pub fn wants_raw_markup(&self) -> bool {
        self.header("accept")
            .map(|accept| {
                accept
                    .split(',')
                    .any(|range| range.split(';').next().map(str::trim) == Some(TKML_MEDIA_TYPE))
            })
            .unwrap_or(false)
    }

    /// Checks if this is a POST request.
    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    /// The `formParams` bag: the parsed body of a POST, empty otherwise.
    pub fn form_params(&self) -> Params {
        match (&self.body, self.is_post()) {
            (Some(body), true) => form_params_or_empty(body, self.content_type()),
            _ => Params::new(),
        }
    }
}

impl Default for TkmlRequest {
    fn default() -> Self {
        Self::new("/", "GET")
    }
}
