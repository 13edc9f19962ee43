// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! CLI command implementations.
//!
//! - `serve`: serve documents over HTTP with change-driven invalidation
//! - `render`: render one document to stdout

/// Single-document render command.
pub mod render;
/// HTTP server command.
pub mod serve;
