// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! TKML server configuration.
//!
//! Configuration is loaded from `tkml.toml` in the working directory.
//! Every key is optional.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8348
//! page_template = "page.html"
//! static_max_age = 3600
//!
//! [documents]
//! root_dir = "./src"
//! extension = "tkml"
//! index = "index.tkml"
//!
//! [render]
//! mode = "program"
//! version = "19"
//!
//! [cache]
//! enabled = true
//! processed_capacity = 1000
//! compiled_capacity = 1000
//! watch = true
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tkml::{CacheOptions, EngineOptions, EvalMode};

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "tkml.toml";

/// Main configuration structure loaded from `tkml.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Document root settings.
    pub documents: DocumentsConfig,
    /// Rendering settings.
    pub render: RenderConfig,
    /// Cache settings.
    pub cache: CacheConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host (default: "127.0.0.1").
    pub host: String,
    /// Bind port (default: 8348).
    pub port: u16,
    /// HTML page template file; the built-in wrapper when unset.
    pub page_template: Option<PathBuf>,
    /// `max-age` for static assets in seconds (default: 3600).
    pub static_max_age: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8348,
            page_template: None,
            static_max_age: 3600,
        }
    }
}

/// Document root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Directory documents are served from (default: "./src").
    pub root_dir: PathBuf,
    /// Document extension (default: "tkml").
    pub extension: String,
    /// Document served for directory paths (default: "index.tkml").
    pub index: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./src"),
            extension: "tkml".to_string(),
            index: "index.tkml".to_string(),
        }
    }
}

/// Rendering configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Evaluation mode (default: program).
    pub mode: EvalMode,
    /// Asset version substituted into the page template (default: "19").
    pub version: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: EvalMode::Program,
            version: tkml::compiler::DEFAULT_VERSION.to_string(),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether rendered output is cached (default: true).
    pub enabled: bool,
    /// Processed tier capacity (default: 1000).
    pub processed_capacity: usize,
    /// Compiled tier capacity (default: 1000).
    pub compiled_capacity: usize,
    /// Whether the document root is watched for changes (default: true).
    pub watch: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            processed_capacity: tkml::cache::DEFAULT_CAPACITY,
            compiled_capacity: tkml::cache::DEFAULT_CAPACITY,
            watch: true,
        }
    }
}

impl Config {
    /// Loads configuration from `tkml.toml` in the current directory.
    ///
    /// If no configuration file exists, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Loads configuration from `path`, defaulting when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Engine options derived from the document and render sections.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            mode: self.render.mode,
            extension: self.documents.extension.clone(),
            index: self.documents.index.clone(),
        }
    }

    /// Cache options derived from the cache section.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            enabled: self.cache.enabled,
            processed_capacity: self.cache.processed_capacity,
            compiled_capacity: self.cache.compiled_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8348);
        assert_eq!(config.documents.root_dir, PathBuf::from("./src"));
        assert_eq!(config.render.mode, EvalMode::Program);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [render]
            mode = "segment"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.render.mode, EvalMode::Segment);
        assert_eq!(config.render.version, "19");
        assert_eq!(config.engine_options().extension, "tkml");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.server.static_max_age, 3600);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
