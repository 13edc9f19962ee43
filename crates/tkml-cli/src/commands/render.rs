// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render command: one document to stdout.

use std::io::Write;
use std::path::PathBuf;

use console::style;
use tkml::{RequestOrchestrator, TkmlRequest, TKML_MEDIA_TYPE};

use crate::config::Config;
use crate::server::AppState;

/// Renders the document at request path `path`.
///
/// Prints the markup, or the full page when `html` is set. Query
/// parameters are given as `key=value` pairs.
pub async fn run(path: &str, html: bool, params: &[String], root: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(root) = root {
        config.documents.root_dir = root;
    }
    let state = AppState::new(config)?;

    let query = params
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.clone(), String::new()),
        })
        .collect();

    let mut request = TkmlRequest::new(path, "GET").with_query(query);
    if !html {
        request = request.with_header("accept", TKML_MEDIA_TYPE);
    }

    let response = RequestOrchestrator::new(
        state.engine.clone(),
        state.compiler.clone(),
        state.template(),
        request,
    )
    .handle()
    .await;

    if response.is_error() {
        eprintln!(
            "{} {}",
            style(format!("Error {}:", response.status())).red().bold(),
            response.body()
        );
        anyhow::bail!("rendering {} failed", path);
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(response.body().as_bytes())?;
    stdout.flush()?;
    Ok(())
}
