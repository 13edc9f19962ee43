// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Document sources.
//!
//! This module provides the [`DocumentSource`] trait and the filesystem
//! implementation used by the server.
//!
//! # Source Implementations
//!
//! - [`FileSystemSource`]: reads documents under a root directory
//! - [`MemorySource`](crate::memory_resolver::MemorySource): in-memory
//!   documents with controllable modification times (testing)
//!
//! Reading is the only suspension point besides `include`, so
//! [`DocumentSource::read`] is async. Modification times are looked up
//! synchronously because freshness checks run between awaits.

use crate::document::DocumentId;
use crate::error::{Result, TkmlError};
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Converts a Path to a normalized string with forward slashes.
#[inline]
pub fn path_to_string<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// A store of documents addressable by [`DocumentId`].
pub trait DocumentSource: Send + Sync + 'static {
    /// Reads the full text of a document.
    ///
    /// Fails with [`TkmlError::DocumentNotFound`] when the document does not
    /// exist.
    fn read<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<String>>;

    /// Current modification time, or `None` when the document is missing.
    fn modified(&self, id: &DocumentId) -> Option<SystemTime>;

    /// True when the document exists.
    fn exists(&self, id: &DocumentId) -> bool {
        self.modified(id).is_some()
    }
}

/// Filesystem-backed document source.
///
/// # Examples
///
/// ```rust,ignore
/// use tkml::FileSystemSource;
///
/// let source = FileSystemSource::new("./src");
/// let text = source.read(&DocumentId::new("index.tkml")?).await?;
/// ```
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root_dir: PathBuf,
}

impl FileSystemSource {
    /// Creates a source rooted at `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// The document root.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Filesystem path of a document.
    pub fn path_of(&self, id: &DocumentId) -> PathBuf {
        id.as_str()
            .split('/')
            .fold(self.root_dir.clone(), |path, part| path.join(part))
    }

    /// Maps an absolute filesystem path under the root back to a document
    /// identifier. Paths outside the root yield `None`.
    pub fn id_of(&self, path: &Path) -> Option<DocumentId> {
        let relative = path.strip_prefix(&self.root_dir).ok().or_else(|| {
            let root = self.root_dir.canonicalize().ok()?;
            path.strip_prefix(root).ok()
        })?;
        DocumentId::new(&path_to_string(relative)).ok()
    }
}

impl DocumentSource for FileSystemSource {
    fn read<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let path = self.path_of(id);
            let not_found = || TkmlError::DocumentNotFound(id.to_string());
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {}
                Ok(_) => return Err(not_found()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
                Err(e) => return Err(TkmlError::IoError(e)),
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
                Err(e) => Err(TkmlError::IoError(e)),
            }
        })
    }

    fn modified(&self, id: &DocumentId) -> Option<SystemTime> {
        let metadata = std::fs::metadata(self.path_of(id)).ok()?;
        if !metadata.is_file() {
            return None;
        }
        metadata.modified().ok()
    }
}
