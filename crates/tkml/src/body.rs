// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Request body parsing into the `formParams` bag.

use crate::context::Params;
use serde_json::Value as JsonValue;
use tracing::warn;

/// Errors that can occur while parsing a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyParseError {
    /// The body is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    /// JSON body whose top level is not an object.
    #[error("JSON body must be an object, got {0}")]
    NotAnObject(&'static str),
    /// Malformed multipart body.
    #[error("Invalid multipart data: {0}")]
    InvalidMultipart(String),
}

/// Parses a body strictly by content type.
///
/// JSON objects map to string values (non-string values are stringified
/// as JSON text), url-encoded forms map directly, and multipart bodies
/// contribute their text fields. An empty body yields an empty bag.
pub fn parse_form_body(body: &[u8], content_type: Option<&str>) -> Result<Params, BodyParseError> {
    if body.is_empty() {
        return Ok(Params::new());
    }
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();

    if content_type.contains("application/x-www-form-urlencoded") {
        return Ok(parse_form_urlencoded(body));
    }

    if content_type.contains("multipart/form-data") {
        return parse_multipart_basic(body, &content_type);
    }

    parse_json_object(body)
}

/// Lenient form of [`parse_form_body`]: a malformed body is logged and
/// yields an empty bag so the request can continue.
pub fn form_params_or_empty(body: &[u8], content_type: Option<&str>) -> Params {
    match parse_form_body(body, content_type) {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "ignoring malformed request body");
            Params::new()
        }
    }
}

/// Parses a query string into a bag. Later duplicates win.
pub fn parse_query(query: &str) -> Params {
    parse_form_urlencoded(query.trim_start_matches('?').as_bytes())
}

fn parse_json_object(bytes: &[u8]) -> Result<Params, BodyParseError> {
    let value: JsonValue =
        serde_json::from_slice(bytes).map_err(|e| BodyParseError::InvalidJson(e.to_string()))?;

    let object = match value {
        JsonValue::Object(object) => object,
        JsonValue::Null => return Ok(Params::new()),
        JsonValue::Array(_) => return Err(BodyParseError::NotAnObject("an array")),
        _ => return Err(BodyParseError::NotAnObject("a scalar")),
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn parse_form_urlencoded(bytes: &[u8]) -> Params {
    form_urlencoded::parse(bytes)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_multipart_basic(bytes: &[u8], content_type: &str) -> Result<Params, BodyParseError> {
    let boundary = content_type
        .split(';')
        .find(|s| s.trim().starts_with("boundary="))
        .and_then(|s| s.trim().strip_prefix("boundary="))
        .ok_or_else(|| BodyParseError::InvalidMultipart("Missing boundary".to_string()))?;

    let boundary = boundary.trim_matches('"');
    let delimiter = format!("--{}", boundary);

    let body_str = String::from_utf8_lossy(bytes);
    let mut form_data = Params::new();

    for part in body_str.split(&delimiter) {
        if part.trim().is_empty() || part.starts_with("--") {
            continue;
        }

        if let Some(idx) = part.find("\r\n\r\n") {
            let headers_str = &part[..idx];
            let content = part[idx + 4..].trim_end_matches("\r\n");

            // File uploads are not exposed to documents
            if let Some(name) = extract_form_field_name(headers_str) {
                if !headers_str.contains("filename=") {
                    form_data.insert(name.to_string(), content.to_string());
                }
            }
        }
    }

    Ok(form_data)
}

fn extract_form_field_name(headers: &str) -> Option<&str> {
    for line in headers.lines() {
        if line.to_lowercase().starts_with("content-disposition:") {
            if let Some(name_part) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                let name = name_part.trim().strip_prefix("name=")?;
                return Some(name.trim_matches('"'));
            }
        }
    }
    None
}
