// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

/// Logging console for document scripts.
pub mod console;
/// JSON module for document scripts.
pub mod json;

pub use console::create_console_module;
pub use json::create_json_module;
