// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Server command.
//!
//! Serves documents from the configured root, with the change feed
//! invalidating cached output as files are edited.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;

use crate::config::Config;
use crate::server::http::create_server;
use crate::server::AppState;
use crate::watcher::FileWatcher;

/// Command-line overrides for the `[server]` and `[documents]` sections.
#[derive(Debug, Default, Clone)]
pub struct ServeOptions {
    /// Bind host.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<u16>,
    /// Document root.
    pub root: Option<PathBuf>,
}

/// Runs the server until the process is stopped.
pub async fn run(options: ServeOptions) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(host) = options.host {
        config.server.host = host;
    }
    if let Some(port) = options.port {
        config.server.port = port;
    }
    if let Some(root) = options.root {
        config.documents.root_dir = root;
    }

    if !config.documents.root_dir.is_dir() {
        anyhow::bail!(
            "document root {} does not exist",
            config.documents.root_dir.display()
        );
    }

    let watch = config.cache.watch && config.cache.enabled;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config)?);

    println!(
        "{} {}",
        style("Serving documents from").dim(),
        state.source.root_dir().display()
    );

    let _watcher = if watch {
        let watcher = FileWatcher::new(state.clone())?;
        println!("{}", style("Watching for changes").dim());
        Some(watcher)
    } else {
        None
    };

    println!(
        "{} {}",
        style("TKML server running at").green().bold(),
        style(format!("http://{}", addr)).cyan().underlined()
    );

    create_server(&addr, state).await
}
