// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

// TkmlError::ParseFailure carries a source snippet for rendering.
#![allow(clippy::result_large_err)]

//! # TKML
//!
//! Server-side renderer for TKML documents with embedded Lua scripting.
//!
//! A document is plain markup with `<? ... ?>` code segments. Rendering a
//! request path parses the document into literal and code segments,
//! evaluates the code in a sandboxed Lua environment, resolves
//! `include(...)` calls recursively and caches every stage, invalidating
//! transitively when a document changes.
//!
//! ## Features
//!
//! - Expression (`<?= x ?>`) and statement (`<? for ... do ?>`) segments
//! - `include`, `finish` and `export` primitives with cycle detection
//! - Raw, processed and compiled cache tiers with dependency tracking
//! - Read-only `queryParams` and `formParams` bags
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tkml::{Engine, MemorySource, Params};
//!
//! let source = MemorySource::new();
//! source.insert("index.tkml", "Hello <?= queryParams.name ?>!");
//! let engine = Engine::with_memory_source(source);
//!
//! let query: Params = [("name".into(), "World".into())].into();
//! let outcome = engine.render_path("/", query, Params::new()).await?;
//! assert_eq!(outcome.content(), "Hello World!");
//! ```

/// Document identifiers and path normalization.
pub mod document;
/// Segment parser.
pub mod parser;
/// Program synthesis from segments.
pub mod synth;
/// Lua execution sandbox.
pub mod sandbox;
/// Lua runtime extensions.
pub mod extensions;
/// Document sources (filesystem).
pub mod resolver;
/// In-memory document source for tests and embedding.
pub mod memory_resolver;
/// Reverse dependency graph between documents.
pub mod dependencies;
/// Multi-tier document cache.
pub mod cache;
/// Request-scoped state.
pub mod context;
/// Rendering engine and include resolution.
pub mod engine;
/// Per-request orchestration.
pub mod orchestrator;
/// Markup compiler seam and page template.
pub mod compiler;
/// Error types and reporting.
pub mod error;
/// HTTP request abstraction.
pub mod request;
/// HTTP response abstraction.
pub mod response;
/// Request body parsing.
pub mod body;

pub use cache::{CacheEntry, CacheManager, CacheOptions, CacheStats, Tier, Versions};
pub use compiler::{MarkupCompiler, PageTemplate, PassthroughCompiler, DEFAULT_PAGE_TEMPLATE};
pub use context::{Params, RequestContext, RequestHandle};
pub use dependencies::DependencyGraph;
pub use document::{DocumentId, PathNormalizer};
pub use engine::{Engine, EngineOptions, EvalMode, Outcome, Rendered};
pub use error::*;
pub use memory_resolver::MemorySource;
pub use orchestrator::RequestOrchestrator;
pub use parser::{parse_segments, CodeKind, CodeSegment, Segment};
pub use request::{TkmlRequest, TKML_MEDIA_TYPE};
pub use resolver::{DocumentSource, FileSystemSource};
pub use response::TkmlResponse;
pub use synth::{synthesize, Program};
