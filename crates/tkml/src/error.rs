// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the TKML renderer.
//!
//! This module defines [`TkmlError`], the main error enum, and the
//! [`SourceContext`] helper used to show where a document failed to parse.
//!
//! # Error Categories
//!
//! - **DocumentNotFound**: the requested or included document does not exist
//! - **CircularInclude**: an include re-entered a document that is still rendering
//! - **ParseFailure**: malformed delimiter pairing in a document
//! - **ScriptExecutionFailure**: a code segment raised an error while running
//! - **Infrastructure**: Lua, I/O, cache and compiler failures
//!
//! # Containment
//!
//! Failures inside included documents never abort the response. They are
//! rendered inline with [`TkmlError::marker`] so the surrounding document
//! stays useful. Only failures on the top-level document reach the HTTP
//! layer, where [`TkmlError::status`] picks the status code.

use thiserror::Error;
use std::fmt;

/// Source context for enhanced error messages.
///
/// Captures a snippet of source code around an error location,
/// enabling rich error messages with line numbers and visual indicators.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// All lines from the source file.
    pub lines: Vec<String>,
    /// The line number where the error occurred (1-indexed).
    pub error_line: usize,
    /// The column number where the error occurred (1-indexed).
    pub error_column: usize,
    /// First line number of the snippet (1-indexed).
    pub snippet_start: usize,
    /// Last line number of the snippet (1-indexed).
    pub snippet_end: usize,
}

impl SourceContext {
    /// Creates a source context from source code and error location.
    ///
    /// Captures 2 lines before and after the error line.
    pub fn from_source(source: &str, line: usize, column: usize) -> Self {
        let lines: Vec<String> = source.lines().map(|l| l.to_string()).collect();
        let snippet_start = line.saturating_sub(2).max(1);
        let snippet_end = (line + 2).min(lines.len());

        Self {
            lines,
            error_line: line,
            error_column: column,
            snippet_start,
            snippet_end,
        }
    }

    /// Formats the snippet with line numbers and a caret under the error column.
    pub fn format_snippet(&self) -> String {
        let mut result = String::new();

        for line_num in self.snippet_start..=self.snippet_end {
            let Some(line) = self.lines.get(line_num - 1) else {
                break;
            };

            result.push_str(&format!("{:4} | {}\n", line_num, line));
            if line_num == self.error_line {
                result.push_str(&format!(
                    "     | {}^\n",
                    " ".repeat(self.error_column.saturating_sub(1))
                ));
            }
        }

        result
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_snippet())
    }
}

/// Helper struct for displaying optional source context.
pub struct OptSourceContextDisplay<'a>(pub &'a Option<SourceContext>);

impl fmt::Display for OptSourceContextDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ctx) => write!(f, "{}", ctx),
            None => Ok(()),
        }
    }
}

/// Helper trait for formatting optional source context.
pub trait AsDisplay<'a> {
    /// Wraps self for Display formatting.
    fn as_display(&'a self) -> OptSourceContextDisplay<'a>;
}

impl<'a> AsDisplay<'a> for Option<SourceContext> {
    fn as_display(&'a self) -> OptSourceContextDisplay<'a> {
        OptSourceContextDisplay(self)
    }
}

/// The main error type for TKML operations.
#[derive(Error, Debug)]
pub enum TkmlError {
    /// The document does not exist under the document root.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// An include named a document that is already being rendered
    /// further up the same request.
    #[error("Circular include detected: {0}")]
    CircularInclude(String),

    /// Malformed delimiter pairing.
    #[error("Parse error in {file}: {message} at line {line}, column {column}\n{}", source_context.as_display())]
    ParseFailure {
        /// Description of the parse error.
        message: String,
        /// Line number where the error occurred.
        line: usize,
        /// Column number where the error occurred.
        column: usize,
        /// The document identifier.
        file: String,
        /// Source context for rich error display.
        source_context: Option<SourceContext>,
    },

    /// A synthesized program or a single segment raised an error.
    #[error("Script error in {document}: {message}")]
    ScriptExecutionFailure {
        /// The document whose code failed.
        document: String,
        /// The failure message reported by the script host.
        message: String,
    },

    /// The request path or include target escapes the document root.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Lua runtime error outside of a code segment (sandbox setup).
    #[error("Lua execution error: {0}")]
    LuaError(#[from] mlua::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Cache operation failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// The external markup compiler rejected the rendered markup.
    #[error("Compile error: {0}")]
    CompileError(String),
}

impl TkmlError {
    /// Renders the bracketed inline marker that replaces a contained failure.
    pub fn marker(&self) -> String {
        match self {
            TkmlError::ParseFailure { message, line, column, file, .. } => format!(
                "[Error: Parse error in {}: {} at line {}, column {}]",
                file, message, line, column
            ),
            TkmlError::ScriptExecutionFailure { message, .. } => format!("[Error: {}]", message),
            other => format!("[Error: {}]", other),
        }
    }

    /// Renders the marker that replaces a failed `include` of `target`.
    pub fn include_marker(&self, target: &str) -> String {
        match self {
            TkmlError::DocumentNotFound(_) => format!("[Error: Import file not found: {}]", target),
            TkmlError::CircularInclude(_) => self.marker(),
            TkmlError::ParseFailure { .. } => self.marker(),
            other => format!("[Error importing {}: {}]", target, other),
        }
    }

    /// HTTP status for a failure on the top-level document.
    pub fn status(&self) -> u16 {
        match self {
            TkmlError::DocumentNotFound(_) | TkmlError::InvalidPath(_) => 404,
            _ => 500,
        }
    }

    /// True when the failure is a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TkmlError::DocumentNotFound(_))
    }
}

/// Convenience type alias for Results with [`TkmlError`].
pub type Result<T> = std::result::Result<T, TkmlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_are_bracketed() {
        let err = TkmlError::CircularInclude("pages/a.tkml".to_string());
        assert_eq!(err.marker(), "[Error: Circular include detected: pages/a.tkml]");

        let err = TkmlError::ScriptExecutionFailure {
            document: "index.tkml".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.marker(), "[Error: boom]");
    }

    #[test]
    fn test_parse_marker_omits_snippet() {
        let source = "line one\n<? unterminated";
        let err = TkmlError::ParseFailure {
            message: "unterminated `<?`".to_string(),
            line: 2,
            column: 1,
            file: "broken.tkml".to_string(),
            source_context: Some(SourceContext::from_source(source, 2, 1)),
        };
        let marker = err.marker();
        assert!(marker.starts_with("[Error: Parse error in broken.tkml"));
        assert!(!marker.contains('\n'));
        assert!(err.to_string().contains("   2 | <? unterminated"));
    }

    #[test]
    fn test_include_markers() {
        let err = TkmlError::DocumentNotFound("parts/nav.tkml".to_string());
        assert_eq!(
            err.include_marker("parts/nav.tkml"),
            "[Error: Import file not found: parts/nav.tkml]"
        );
        let err = TkmlError::InvalidPath("../x.tkml".to_string());
        assert_eq!(
            err.include_marker("../x.tkml"),
            "[Error importing ../x.tkml: Invalid path: ../x.tkml]"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(TkmlError::DocumentNotFound("x".into()).status(), 404);
        assert_eq!(TkmlError::CacheError("x".into()).status(), 500);
    }
}
