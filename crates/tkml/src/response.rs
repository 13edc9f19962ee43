// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP response abstraction for the TKML renderer.
//!
//! The orchestrator returns one of these; adapters convert it to their
//! platform-specific response type.

use crate::request::TKML_MEDIA_TYPE;
use std::collections::HashMap;

/// Content type of compiled pages.
pub const HTML_MEDIA_TYPE: &str = "text/html; charset=utf-8";
/// Content type of error bodies.
pub const TEXT_MEDIA_TYPE: &str = "text/plain; charset=utf-8";

/// A platform-agnostic HTTP response.
///
/// # Example
///
/// ```rust
/// use tkml::TkmlResponse;
///
/// let page = TkmlResponse::html(200, "<html></html>");
/// assert_eq!(page.content_type(), "text/html; charset=utf-8");
///
/// let missing = TkmlResponse::not_found("TKML file not found: /x.tkml");
/// assert!(missing.is_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TkmlResponse {
    /// Raw rendered markup.
    Markup {
        /// HTTP status code
        status: u16,
        /// HTTP headers
        headers: HashMap<String, String>,
        /// Markup body
        body: String,
    },

    /// Compiled HTML page.
    Html {
        /// HTTP status code
        status: u16,
        /// HTTP headers
        headers: HashMap<String, String>,
        /// HTML body
        body: String,
    },

    /// Plain-text error response
    Error {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },
}

impl TkmlResponse {
    /// Creates a raw markup response.
    pub fn markup(status: u16, body: impl Into<String>) -> Self {
        Self::Markup {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Creates an HTML response.
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::Html {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Creates an error response.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
        }
    }

    /// Creates a 404 Not Found response.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(404, message)
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::error(500, message)
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Markup { status, .. } | Self::Html { status, .. } | Self::Error { status, .. } => *status,
        }
    }

    /// Returns the content type of the body.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Markup { .. } => TKML_MEDIA_TYPE,
            Self::Html { .. } => HTML_MEDIA_TYPE,
            Self::Error { .. } => TEXT_MEDIA_TYPE,
        }
    }

    /// Returns the body.
    pub fn body(&self) -> &str {
        match self {
            Self::Markup { body, .. } | Self::Html { body, .. } => body,
            Self::Error { message, .. } => message,
        }
    }

    /// Returns the extra headers (empty for errors).
    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Markup { headers, .. } | Self::Html { headers, .. } => Some(headers),
            Self::Error { .. } => None,
        }
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// Returns true if this is an error response (4xx or 5xx).
    pub fn is_error(&self) -> bool {
        self.status() >= 400
    }

    /// Adds a header to the response (only for Markup and Html variants).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Markup { headers, .. } | Self::Html { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
            Self::Error { .. } => {}
        }
        self
    }
}

impl Default for TkmlResponse {
    fn default() -> Self {
        Self::markup(200, "")
    }
}
