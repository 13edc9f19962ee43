// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Change feed for the document root.
//!
//! `FileWatcher` turns debounced filesystem events into cache
//! invalidations:
//!
//! - a changed document invalidates itself and, through the dependency
//!   graph, every document that includes it
//! - a changed `tkml.toml` or page template clears every cache tier and
//!   reloads the template

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tkml::{DocumentId, FileSystemSource, PathNormalizer};
use tracing::{debug, warn};

use crate::server::AppState;

/// A relevant filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A document under the root changed, appeared or disappeared.
    Document(DocumentId),
    /// The configuration file or page template changed.
    Settings(PathBuf),
}

/// Maps a changed path to a [`Change`], ignoring everything else.
pub fn classify(
    path: &Path,
    source: &FileSystemSource,
    normalizer: &PathNormalizer,
    settings: &[PathBuf],
) -> Option<Change> {
    if settings.iter().any(|file| file == path) {
        return Some(Change::Settings(path.to_path_buf()));
    }
    let name = path.to_str()?;
    if !normalizer.is_document_path(name) {
        return None;
    }
    source.id_of(path).map(Change::Document)
}

/// Applies changes to the shared state.
pub fn apply_changes(state: &AppState, changes: &[Change]) {
    let cache = state.engine.cache();

    if changes.iter().any(|c| matches!(c, Change::Settings(_))) {
        if let Err(e) = cache.clear_all() {
            warn!(error = %e, "could not clear caches");
        }
        state.reload_template();
        return;
    }

    for change in changes {
        if let Change::Document(id) = change {
            match cache.invalidate(id) {
                Ok(invalidated) => debug!(document = %id, count = invalidated.len(), "change applied"),
                Err(e) => warn!(document = %id, error = %e, "could not invalidate"),
            }
        }
    }
}

/// Watches the document root and settings files.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl FileWatcher {
    /// Starts watching for `state`.
    ///
    /// Events are debounced for 250ms.
    pub fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let root = state.source.root_dir().to_path_buf();
        let settings = state.settings_files();
        let handler_state = state.clone();
        let handler_settings = settings.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(250),
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    let mut changes: Vec<Change> = Vec::new();
                    for path in events.iter().flat_map(|e| e.paths.iter()) {
                        if let Some(change) = classify(
                            path,
                            &handler_state.source,
                            handler_state.engine.normalizer(),
                            &handler_settings,
                        ) {
                            if !changes.contains(&change) {
                                changes.push(change);
                            }
                        }
                    }
                    if !changes.is_empty() {
                        apply_changes(&handler_state, &changes);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "watch error");
                    }
                }
            },
        )?;

        debouncer.watch(&root, RecursiveMode::Recursive)?;
        for file in &settings {
            let Some(dir) = file.parent() else { continue };
            if dir.starts_with(&root) || !dir.is_dir() {
                continue;
            }
            if let Err(e) = debouncer.watch(dir, RecursiveMode::NonRecursive) {
                warn!(path = %dir.display(), error = %e, "could not watch settings directory");
            }
        }

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let root = PathBuf::from("/srv/docs");
        let source = FileSystemSource::new(&root);
        let normalizer = PathNormalizer::default();
        let settings = vec![PathBuf::from("/srv/tkml.toml")];

        assert_eq!(
            classify(&root.join("parts/nav.tkml"), &source, &normalizer, &settings),
            Some(Change::Document(DocumentId::new("parts/nav.tkml").unwrap()))
        );
        assert_eq!(
            classify(Path::new("/srv/tkml.toml"), &source, &normalizer, &settings),
            Some(Change::Settings(PathBuf::from("/srv/tkml.toml")))
        );
        assert_eq!(classify(&root.join("app.js"), &source, &normalizer, &settings), None);
        assert_eq!(classify(Path::new("/elsewhere/a.tkml"), &source, &normalizer, &settings), None);
    }
}
