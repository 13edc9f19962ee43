// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Document identifiers and path normalization.
//!
//! Every cache tier and the dependency graph are keyed by [`DocumentId`], a
//! normalized root-relative path:
//!
//! - `\` separators become `/`
//! - empty and `.` components are dropped, `..` pops a component
//! - a `..` that would leave the document root is rejected
//! - no leading slash
//!
//! [`PathNormalizer`] turns request paths and include targets into
//! identifiers. Request paths that do not name a document are treated as
//! directories and get the index document appended.

use crate::error::{Result, TkmlError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default document extension (without the dot).
pub const DEFAULT_EXTENSION: &str = "tkml";
/// Default document name for directory-like paths.
pub const DEFAULT_INDEX: &str = "index.tkml";

/// A normalized, root-relative document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Normalizes a root-relative path into an identifier.
    ///
    /// Fails with [`TkmlError::InvalidPath`] when `..` components climb
    /// above the document root.
    pub fn new(path: &str) -> Result<Self> {
        let components = normalize_components(&[], path)?;
        Ok(Self(components.join("/")))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The directory part of the identifier ("" for documents at the root).
    pub fn parent_dir(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// True when the identifier ends with `.{extension}` (ASCII case-insensitive).
    pub fn has_extension(&self, extension: &str) -> bool {
        has_extension(&self.0, extension)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn has_extension(path: &str, extension: &str) -> bool {
    let suffix_len = extension.len() + 1;
    if path.len() <= suffix_len || !path.is_char_boundary(path.len() - suffix_len) {
        return false;
    }
    let (_, suffix) = path.split_at(path.len() - suffix_len);
    suffix.starts_with('.') && suffix[1..].eq_ignore_ascii_case(extension)
}

/// Splits `path` on either separator and folds it onto `base`.
fn normalize_components(base: &[&str], path: &str) -> Result<Vec<String>> {
    let mut components: Vec<String> = base.iter().map(|c| c.to_string()).collect();

    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(TkmlError::InvalidPath(path.to_string()));
                }
            }
            other => components.push(other.to_string()),
        }
    }

    Ok(components)
}

/// Maps request paths and include targets to [`DocumentId`]s.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    extension: String,
    index: String,
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION, DEFAULT_INDEX)
    }
}

impl PathNormalizer {
    /// Creates a normalizer for the given document extension and index name.
    pub fn new(extension: impl Into<String>, index: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            extension: extension.trim_start_matches('.').to_string(),
            index: index.into(),
        }
    }

    /// The document extension (without the dot).
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// True when `path` names a document rather than a directory or asset.
    pub fn is_document_path(&self, path: &str) -> bool {
        has_extension(path, &self.extension)
    }

    /// Maps an incoming request path to a document identifier.
    ///
    /// `/docs/page.tkml` maps to `docs/page.tkml`; `/docs` and `/docs/`
    /// both map to `docs/index.tkml`; `/` maps to `index.tkml`.
    pub fn from_request_path(&self, path: &str) -> Result<DocumentId> {
        let mut components = normalize_components(&[], path)?;
        if !self.is_document_path(path) {
            components.push(self.index.clone());
        }
        Ok(DocumentId(components.join("/")))
    }

    /// Maps a request path for a static asset to a root-relative identifier.
    pub fn asset_path(&self, path: &str) -> Result<DocumentId> {
        DocumentId::new(path)
    }

    /// Resolves an include target against the including document.
    ///
    /// Targets starting with `/` resolve against the document root, anything
    /// else against the includer's directory. A trailing `/` names a
    /// directory and gets the index document appended.
    pub fn resolve_include(&self, includer: &DocumentId, target: &str) -> Result<DocumentId> {
        let target = target.trim();
        let base: Vec<&str> = if target.starts_with('/') || target.starts_with('\\') {
            Vec::new()
        } else {
            includer.parent_dir().split('/').filter(|c| !c.is_empty()).collect()
        };

        let mut components = normalize_components(&base, target)?;
        if target.ends_with('/') || components.is_empty() {
            components.push(self.index.clone());
        }
        Ok(DocumentId(components.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s).unwrap()
    }

    #[test]
    fn test_request_path_to_document() {
        let n = PathNormalizer::default();
        assert_eq!(n.from_request_path("/docs/page.tkml").unwrap(), id("docs/page.tkml"));
        assert_eq!(n.from_request_path("/docs").unwrap(), id("docs/index.tkml"));
        assert_eq!(n.from_request_path("/docs/").unwrap(), id("docs/index.tkml"));
        assert_eq!(n.from_request_path("/").unwrap(), id("index.tkml"));
        assert_eq!(n.from_request_path("").unwrap(), id("index.tkml"));
    }

    #[test]
    fn test_separators_and_dots_are_normalized() {
        assert_eq!(id("/a//b/./c.tkml").as_str(), "a/b/c.tkml");
        assert_eq!(id("a\\b\\c.tkml").as_str(), "a/b/c.tkml");
        assert_eq!(id("a/x/../c.tkml").as_str(), "a/c.tkml");
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let n = PathNormalizer::default();
        assert_eq!(n.from_request_path("/Page.TKML").unwrap().as_str(), "Page.TKML");
        assert!(id("Page.TKML").has_extension("tkml"));
        assert!(!id("tkml").has_extension("tkml"));
    }

    #[test]
    fn test_escaping_root_is_rejected() {
        let n = PathNormalizer::default();
        assert!(matches!(
            n.from_request_path("/../secret.tkml"),
            Err(TkmlError::InvalidPath(_))
        ));
        assert!(n.resolve_include(&id("a.tkml"), "../../b.tkml").is_err());
    }

    #[test]
    fn test_include_resolution() {
        let n = PathNormalizer::default();
        let includer = id("pages/blog/post.tkml");
        assert_eq!(n.resolve_include(&includer, "header.tkml").unwrap(), id("pages/blog/header.tkml"));
        assert_eq!(n.resolve_include(&includer, "./header.tkml").unwrap(), id("pages/blog/header.tkml"));
        assert_eq!(n.resolve_include(&includer, "../nav.tkml").unwrap(), id("pages/nav.tkml"));
        assert_eq!(n.resolve_include(&includer, "/shared/footer.tkml").unwrap(), id("shared/footer.tkml"));
        assert_eq!(n.resolve_include(&includer, "/widgets/").unwrap(), id("widgets/index.tkml"));
    }

    #[test]
    fn test_include_from_root_document() {
        let n = PathNormalizer::default();
        assert_eq!(n.resolve_include(&id("index.tkml"), "b.tkml").unwrap(), id("b.tkml"));
    }
}
