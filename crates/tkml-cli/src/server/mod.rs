// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP server components.
//!
//! # Components
//!
//! - `http`: axum router and the document handler
//! - `static_files`: fixed extension table for static assets

/// HTTP server implementation using Axum.
pub mod http;
/// Static asset serving.
pub mod static_files;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use tkml::{CacheManager, Engine, FileSystemSource, MarkupCompiler, PageTemplate, PassthroughCompiler};
use tracing::{info, warn};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Rendering engine over the document root.
    pub engine: Engine,
    /// The document root as a filesystem source.
    pub source: Arc<FileSystemSource>,
    /// Markup compiler for HTML responses.
    pub compiler: Arc<dyn MarkupCompiler>,
    /// Current page template; replaced when its file changes.
    template: RwLock<Arc<PageTemplate>>,
    /// Application configuration.
    pub config: Config,
}

impl AppState {
    /// Builds the state for `config`, serving documents from the
    /// configured root.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let root = config.documents.root_dir.clone();
        let root = root.canonicalize().unwrap_or(root);
        let source = Arc::new(FileSystemSource::new(root));
        let cache = Arc::new(CacheManager::new(config.cache_options()));
        let engine = Engine::new(source.clone(), cache, config.engine_options());
        let template = load_page_template(&config)?;

        Ok(Self {
            engine,
            source,
            compiler: Arc::new(PassthroughCompiler::new()),
            template: RwLock::new(Arc::new(template)),
            config,
        })
    }

    /// The current page template.
    pub fn template(&self) -> Arc<PageTemplate> {
        match self.template.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reloads the page template from disk. On failure the previous
    /// template stays in place.
    pub fn reload_template(&self) {
        match load_page_template(&self.config) {
            Ok(template) => {
                let mut guard = match self.template.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *guard = Arc::new(template);
                info!("reloaded page template");
            }
            Err(e) => warn!(error = %e, "keeping previous page template"),
        }
    }

    /// Files whose change clears every cache tier.
    pub fn settings_files(&self) -> Vec<PathBuf> {
        let mut files = vec![absolute(PathBuf::from(crate::config::CONFIG_FILE))];
        if let Some(template) = &self.config.server.page_template {
            files.push(absolute(template.clone()));
        }
        files
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .map(|dir| dir.join(&path))
        .unwrap_or(path)
}

/// Loads the configured page template, or the built-in one.
pub fn load_page_template(config: &Config) -> anyhow::Result<PageTemplate> {
    let version = config.render.version.clone();
    match &config.server.page_template {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("could not read page template {}", path.display()))?;
            Ok(PageTemplate::new(text, version))
        }
        None => Ok(PageTemplate::new(tkml::DEFAULT_PAGE_TEMPLATE, version)),
    }
}
