// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! TKML CLI library.
//!
//! This crate provides the HTTP server and command-line interface for the
//! TKML renderer.
//!
//! # Usage
//!
//! This crate is primarily used through the `tkml` binary:
//!
//! ```bash
//! tkml serve                 # Serve ./src on 127.0.0.1:8348
//! tkml render /docs/ --html  # Print one rendered page
//! ```
//!
//! # Configuration
//!
//! Projects are configured via `tkml.toml` in the working directory.

/// CLI commands (serve, render).
pub mod commands;
/// Configuration from `tkml.toml`.
pub mod config;
/// HTTP server.
pub mod server;
/// File system change feed.
pub mod watcher;
