// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use crate::document::DocumentId;
use crate::error::{Result, TkmlError};
use crate::resolver::DocumentSource;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct StoredDocument {
    text: String,
    modified: SystemTime,
}

/// In-memory document source with controllable modification times.
///
/// Clones share the same storage, so a test can keep a handle while the
/// engine owns another.
#[derive(Clone, Default)]
pub struct MemorySource {
    documents: Arc<Mutex<HashMap<DocumentId, StoredDocument>>>,
}

impl MemorySource {
    /// Create an empty memory source.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_documents<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut HashMap<DocumentId, StoredDocument>) -> R,
    {
        let mut documents = match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut documents)
    }

    /// Adds or replaces a document, stamping it with the current time.
    pub fn insert(&self, path: &str, text: impl Into<String>) {
        self.insert_at(path, text, SystemTime::now());
    }

    /// Adds or replaces a document with an explicit modification time.
    pub fn insert_at(&self, path: &str, text: impl Into<String>, modified: SystemTime) {
        let Ok(id) = DocumentId::new(path) else {
            return;
        };
        self.with_documents(|documents| {
            documents.insert(
                id,
                StoredDocument {
                    text: text.into(),
                    modified,
                },
            );
        });
    }

    /// Replaces a document's text and stamps it with the current time,
    /// simulating an edit on disk.
    pub fn edit(&self, path: &str, text: impl Into<String>) {
        self.insert_at(path, text, SystemTime::now());
    }

    /// Moves a document's modification time without changing its text.
    pub fn touch(&self, path: &str, modified: SystemTime) {
        let Ok(id) = DocumentId::new(path) else {
            return;
        };
        self.with_documents(|documents| {
            if let Some(doc) = documents.get_mut(&id) {
                doc.modified = modified;
            }
        });
    }

    /// Removes a document.
    pub fn remove(&self, path: &str) {
        let Ok(id) = DocumentId::new(path) else {
            return;
        };
        self.with_documents(|documents| {
            documents.remove(&id);
        });
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.with_documents(|documents| documents.len())
    }

    /// True when no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentSource for MemorySource {
    fn read<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<String>> {
        let result = self.with_documents(|documents| {
            documents
                .get(id)
                .map(|doc| doc.text.clone())
                .ok_or_else(|| TkmlError::DocumentNotFound(id.to_string()))
        });
        Box::pin(async move { result })
    }

    fn modified(&self, id: &DocumentId) -> Option<SystemTime> {
        self.with_documents(|documents| documents.get(id).map(|doc| doc.modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_insert_and_read() {
        let source = MemorySource::new();
        source.insert("/pages/a.tkml", "A");
        let id = DocumentId::new("pages/a.tkml").unwrap();
        assert_eq!(source.read(&id).await.unwrap(), "A");
        assert_eq!(source.len(), 1);
    }

    #[tokio::test]
    async fn test_edit_moves_mtime_forward() {
        let source = MemorySource::new();
        let id = DocumentId::new("a.tkml").unwrap();
        source.insert_at("a.tkml", "old", SystemTime::now() - Duration::from_secs(10));
        let before = source.modified(&id).unwrap();

        source.edit("a.tkml", "new");
        assert!(source.modified(&id).unwrap() > before);
        assert_eq!(source.read(&id).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_removed_document_is_not_found() {
        let source = MemorySource::new();
        source.insert("a.tkml", "A");
        source.remove("a.tkml");
        let id = DocumentId::new("a.tkml").unwrap();
        assert!(matches!(source.read(&id).await, Err(TkmlError::DocumentNotFound(_))));
        assert!(!source.exists(&id));
        assert!(source.is_empty());
    }
}
