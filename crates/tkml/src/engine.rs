// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Document rendering engine.
//!
//! The [`Engine`] ties the pipeline together: it reads documents through a
//! [`DocumentSource`], consults the [`CacheManager`], parses and evaluates
//! documents inside a per-request Lua VM, and resolves `include(...)` calls
//! recursively.
//!
//! # Evaluation modes
//!
//! - [`EvalMode::Program`]: the whole document is synthesized into one
//!   chunk. A failure keeps the output produced so far and appends one
//!   inline error marker.
//! - [`EvalMode::Segment`]: code segments run one at a time. Each failure
//!   becomes a marker at that segment and later segments still run.
//!   Expressions without a call run synchronously.
//!
//! # Termination
//!
//! `finish(result)` records the result in the request context and raises
//! an error to unwind the Lua stack. Every evaluation step checks the
//! context afterwards, so termination is observed even if the document
//! caught the error with `pcall`. An `include` of a terminated request
//! raises again without reading anything, which unwinds every enclosing
//! document up to the top-level request.
//!
//! # Example
//!
//! ```rust,ignore
//! use tkml::{Engine, MemorySource};
//!
//! let source = MemorySource::new();
//! source.insert("index.tkml", "Hello <?= 1+1 ?>!");
//! let engine = Engine::with_memory_source(source);
//! let outcome = engine.render_path("/", Params::new(), Params::new()).await?;
//! assert_eq!(outcome.content(), "Hello 2!");
//! ```

use crate::cache::{CacheEntry, CacheManager, Tier, Versions};
use crate::context::{Params, RequestContext, RequestHandle};
use crate::document::{DocumentId, PathNormalizer};
use crate::error::{Result, TkmlError};
use crate::memory_resolver::MemorySource;
use crate::parser::{parse_segments, CodeKind, CodeSegment, Segment};
use crate::resolver::DocumentSource;
use crate::sandbox;
use crate::synth::{relocate_error_lines, synthesize, Program};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use mlua::{Function, Lua, LuaSerdeExt, Result as LuaResult, Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const FINISH_SIGNAL: &str = "document finished";

fn finish_signal() -> mlua::Error {
    mlua::Error::RuntimeError(FINISH_SIGNAL.to_string())
}

/// Extracts the human-readable part of a Lua error.
fn error_message(err: &mlua::Error) -> String {
    let message = match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => return error_message(cause),
        mlua::Error::ExternalError(err) => err.to_string(),
        other => other.to_string(),
    };
    match message.find("\nstack traceback:") {
        Some(idx) => message[..idx].to_string(),
        None => message,
    }
}

/// Exports as JSON for the processed tier.
///
/// Exports that JSON cannot carry unchanged (functions, mixed or sparse
/// tables, integer keys) mark the current frame uncacheable instead, so a
/// replay never differs from a fresh render.
fn exports_snapshot(
    lua: &Lua,
    ctx: &RequestHandle,
    id: &DocumentId,
    exports: &Table,
) -> Result<Option<serde_json::Value>> {
    let exports = Value::Table(exports.clone());
    let snapshot = lua
        .from_value::<serde_json::Value>(exports.clone())
        .and_then(|json| Ok((lua.to_value(&json)?, json)));

    let unchanged = match &snapshot {
        Ok((restored, _)) => same_value(&exports, restored)?,
        Err(e) => {
            debug!(document = %id, error = %e, "exports are not representable as JSON");
            false
        }
    };
    match snapshot {
        Ok((_, json)) if unchanged => Ok(Some(json)),
        _ => {
            debug!(document = %id, "exports are not cacheable");
            ctx.mark_uncacheable()?;
            Ok(None)
        }
    }
}

/// Structural equality of two Lua values; tables compare by content.
fn same_value(a: &Value, b: &Value) -> LuaResult<bool> {
    match (a, b) {
        (Value::Nil, Value::Nil) => Ok(true),
        (Value::Boolean(x), Value::Boolean(y)) => Ok(x == y),
        (Value::Integer(x), Value::Integer(y)) => Ok(x == y),
        (Value::Number(x), Value::Number(y)) => Ok(x == y),
        (Value::String(x), Value::String(y)) => Ok(*x.as_bytes() == *y.as_bytes()),
        (Value::LightUserData(x), Value::LightUserData(y)) => Ok(x == y),
        (Value::Table(x), Value::Table(y)) => {
            let mut equal = true;
            let mut count = 0usize;
            x.for_each(|key: Value, value: Value| {
                count += 1;
                if equal {
                    let other: Value = y.raw_get(key)?;
                    equal = same_value(&value, &other)?;
                }
                Ok(())
            })?;
            let mut other_count = 0usize;
            y.for_each(|_: Value, _: Value| {
                other_count += 1;
                Ok(())
            })?;
            Ok(equal && count == other_count)
        }
        _ => Ok(false),
    }
}

/// How code segments are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// Synthesize the whole document into one program.
    #[default]
    Program,
    /// Evaluate each code segment on its own.
    Segment,
}

/// Result of evaluating a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The document rendered to completion.
    Continue(String),
    /// `finish` was called; the value is the termination result.
    Terminated(String),
}

impl Outcome {
    /// The rendered output or the termination result.
    pub fn content(&self) -> &str {
        match self {
            Outcome::Continue(s) | Outcome::Terminated(s) => s,
        }
    }

    /// Consumes the outcome, returning its content.
    pub fn into_content(self) -> String {
        match self {
            Outcome::Continue(s) | Outcome::Terminated(s) => s,
        }
    }

    /// True for [`Outcome::Terminated`].
    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Terminated(_))
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Evaluation mode.
    pub mode: EvalMode,
    /// Document extension (without the dot).
    pub extension: String,
    /// Document name appended to directory-like paths.
    pub index: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: EvalMode::default(),
            extension: crate::document::DEFAULT_EXTENSION.to_string(),
            index: crate::document::DEFAULT_INDEX.to_string(),
        }
    }
}

/// A rendered top-level document.
#[derive(Debug, Clone)]
pub struct Rendered {
    /// The document's outcome.
    pub outcome: Outcome,
    /// Every document the output was produced from, at any depth.
    pub dependencies: BTreeSet<DocumentId>,
    /// Modification time of the document and of each dependency as read.
    pub versions: Versions,
    /// Whether the output may be cached.
    pub cacheable: bool,
}

struct Produced {
    outcome: Outcome,
    exports: Option<Table>,
    dependencies: BTreeSet<DocumentId>,
    versions: Versions,
    cacheable: bool,
}

/// The rendering engine. Cheap to clone; clones share the source and cache.
#[derive(Clone)]
pub struct Engine {
    source: Arc<dyn DocumentSource>,
    cache: Arc<CacheManager>,
    normalizer: PathNormalizer,
    mode: EvalMode,
}

impl Engine {
    /// Creates an engine over `source` sharing `cache`.
    pub fn new(source: Arc<dyn DocumentSource>, cache: Arc<CacheManager>, options: EngineOptions) -> Self {
        Self {
            source,
            cache,
            normalizer: PathNormalizer::new(options.extension, options.index),
            mode: options.mode,
        }
    }

    /// Creates an engine over in-memory documents with a default cache.
    pub fn with_memory_source(source: MemorySource) -> Self {
        Self::new(
            Arc::new(source),
            Arc::new(CacheManager::default()),
            EngineOptions::default(),
        )
    }

    /// Returns a copy of this engine using `mode`.
    pub fn with_mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }

    /// The document source.
    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// The path normalizer.
    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    /// Renders a request path with the given parameters.
    pub async fn render_path(&self, path: &str, query: Params, form: Params) -> Result<Outcome> {
        let id = self.normalizer.from_request_path(path)?;
        let ctx = RequestHandle::new(RequestContext::new(query, form));
        Ok(self.render(&id, &ctx).await?.outcome)
    }

    /// Renders the top-level document `id` for the request `ctx`.
    ///
    /// A missing document and a parse failure are returned as errors;
    /// script failures are rendered inline.
    pub async fn render(&self, id: &DocumentId, ctx: &RequestHandle) -> Result<Rendered> {
        let lua = sandbox::create_vm()?;
        let Some(_guard) = ctx.enter(id)? else {
            return Err(TkmlError::CircularInclude(id.to_string()));
        };

        let produced = self.produce(lua, ctx.clone(), id.clone()).await?;
        Ok(Rendered {
            outcome: produced.outcome,
            dependencies: produced.dependencies,
            versions: produced.versions,
            cacheable: produced.cacheable,
        })
    }

    /// Produces the output of `id`, from the processed tier when possible.
    fn produce(&self, lua: Lua, ctx: RequestHandle, id: DocumentId) -> BoxFuture<'static, Result<Produced>> {
        let engine = self.clone();
        async move {
            let fingerprint = ctx.fingerprint()?;
            let cached = engine
                .cache
                .lookup(Tier::Processed, &id, &fingerprint, engine.source.as_ref())?;
            if let Some(entry) = cached {
                // An output read through a document that is in flight now
                // would render that document's cycle differently.
                let mut reentrant = false;
                for dependency in &entry.dependencies {
                    reentrant |= ctx.is_in_flight(dependency)?;
                }
                if !reentrant {
                    return engine.replay(&lua, &ctx, &entry);
                }
            }

            ctx.push_frame(&id)?;
            let result = engine.evaluate(&lua, &ctx, &id).await;
            let exports_json = match &result {
                Ok((_, exports)) => exports_snapshot(&lua, &ctx, &id, exports),
                Err(_) => Ok(None),
            };
            let summary = ctx.pop_frame()?;
            let (outcome, exports) = result?;
            let exports_json = exports_json?;

            if summary.cacheable {
                engine.cache.store(
                    Tier::Processed,
                    &id,
                    CacheEntry {
                        content: outcome.content().to_string(),
                        dependencies: summary.dependencies.clone(),
                        versions: summary.versions.clone(),
                        fingerprint,
                        terminated: outcome.is_terminated(),
                        exports: exports_json,
                    },
                )?;
            }

            Ok(Produced {
                outcome,
                exports: Some(exports),
                dependencies: summary.dependencies,
                versions: summary.versions,
                cacheable: summary.cacheable,
            })
        }
        .boxed()
    }

    /// Turns a cached entry back into a production, re-signalling
    /// termination and restoring exports.
    fn replay(&self, lua: &Lua, ctx: &RequestHandle, entry: &CacheEntry) -> Result<Produced> {
        ctx.absorb_cached(&entry.dependencies, &entry.versions)?;

        let exports = match &entry.exports {
            Some(json) => match lua.to_value(json)? {
                Value::Table(table) => Some(table),
                _ => None,
            },
            None => None,
        };

        let outcome = if entry.terminated {
            ctx.terminate(entry.content.clone())?;
            Outcome::Terminated(entry.content.clone())
        } else {
            Outcome::Continue(entry.content.clone())
        };

        Ok(Produced {
            outcome,
            exports,
            dependencies: entry.dependencies.clone(),
            versions: entry.versions.clone(),
            cacheable: true,
        })
    }

    /// Reads the text of `id` and records the modification time it was
    /// read at in the current frame.
    async fn load_text(&self, ctx: &RequestHandle, id: &DocumentId) -> Result<String> {
        if let Some((text, modified)) = self.cache.raw_get(id, self.source.as_ref())? {
            ctx.record_version(id, modified)?;
            return Ok(text);
        }
        // Taken before the read, so an edit racing the read can only leave
        // an outdated version behind.
        let modified = self.source.modified(id);
        let text = self.source.read(id).await?;
        if let Some(modified) = modified {
            self.cache.raw_put(id, &text, modified)?;
            ctx.record_version(id, modified)?;
        }
        Ok(text)
    }

    async fn evaluate(&self, lua: &Lua, ctx: &RequestHandle, id: &DocumentId) -> Result<(Outcome, Table)> {
        let text = self.load_text(ctx, id).await?;
        let segments = parse_segments(id, &text)?;

        let env = sandbox::create_environment(lua, id.as_str(), &ctx.query_params()?, &ctx.form_params()?)?;
        let exports = lua.create_table()?;
        self.bind_capabilities(lua, ctx, id, &env, &exports)?;

        let outcome = match self.mode {
            EvalMode::Program => self.run_program(lua, ctx, &synthesize(id, &segments), env).await?,
            EvalMode::Segment => self.run_segments(lua, ctx, id, &segments, env).await?,
        };
        Ok((outcome, exports))
    }

    /// Binds `include`, `finish` and `export` into a document environment.
    fn bind_capabilities(
        &self,
        lua: &Lua,
        ctx: &RequestHandle,
        id: &DocumentId,
        env: &Table,
        exports: &Table,
    ) -> LuaResult<()> {
        let engine = self.clone();
        let include_ctx = ctx.clone();
        let includer = id.clone();
        let includer_env = env.clone();
        let include = lua.create_async_function(move |lua, target: String| {
            let engine = engine.clone();
            let ctx = include_ctx.clone();
            let includer = includer.clone();
            let env = includer_env.clone();
            async move { engine.include(lua, ctx, includer, env, target).await }
        })?;
        env.set("include", include)?;

        let finish_ctx = ctx.clone();
        let finish = lua.create_function(move |lua, result: Value| -> LuaResult<()> {
            let text = sandbox::render_value(lua, result)?;
            finish_ctx.terminate(text).map_err(mlua::Error::external)?;
            Err(finish_signal())
        })?;
        env.set("finish", finish)?;

        let export_table = exports.clone();
        let export = lua.create_function(move |_, (name, value): (String, Value)| {
            export_table.set(name, value)
        })?;
        env.set("export", export)?;

        Ok(())
    }

    /// Resolves one `include(target)` call made by `includer`.
    ///
    /// Failures become inline markers; termination of the request is
    /// re-raised so the including document unwinds too.
    async fn include(
        self,
        lua: Lua,
        ctx: RequestHandle,
        includer: DocumentId,
        env: Table,
        target: String,
    ) -> LuaResult<String> {
        if ctx.is_terminated().map_err(mlua::Error::external)? {
            return Err(finish_signal());
        }

        let id = match self.normalizer.resolve_include(&includer, &target) {
            Ok(id) => id,
            Err(e) => {
                warn!(document = %includer, target = %target, error = %e, "include rejected");
                return Ok(e.include_marker(&target));
            }
        };
        debug!(includer = %includer, document = %id, "include");

        self.cache
            .add_dependency(&id, &includer)
            .map_err(mlua::Error::external)?;
        ctx.record_dependency(&id).map_err(mlua::Error::external)?;

        let Some(_guard) = ctx.enter(&id).map_err(mlua::Error::external)? else {
            ctx.record_cycle(&id).map_err(mlua::Error::external)?;
            let err = TkmlError::CircularInclude(id.to_string());
            warn!(document = %includer, "{}", err);
            return Ok(err.marker());
        };

        match self.produce(lua, ctx, id.clone()).await {
            Ok(Produced {
                outcome: Outcome::Terminated(_),
                ..
            }) => Err(finish_signal()),
            Ok(Produced {
                outcome: Outcome::Continue(content),
                exports,
                ..
            }) => {
                if let Some(exports) = exports {
                    exports.for_each(|name: Value, value: Value| env.set(name, value))?;
                }
                Ok(content)
            }
            Err(e) => {
                warn!(document = %id, includer = %includer, error = %e, "include failed");
                Ok(e.include_marker(id.as_str()))
            }
        }
    }

    fn terminated_outcome(&self, ctx: &RequestHandle) -> Result<Option<Outcome>> {
        if ctx.is_terminated()? {
            let result = ctx.termination_result()?.unwrap_or_default();
            return Ok(Some(Outcome::Terminated(result)));
        }
        Ok(None)
    }

    async fn run_program(&self, lua: &Lua, ctx: &RequestHandle, program: &Program, env: Table) -> Result<Outcome> {
        let loaded = lua
            .load(program.source.as_str())
            .set_name(program.chunk_name())
            .set_environment(env)
            .into_function();
        let func = match loaded {
            Ok(func) => func,
            Err(e) => {
                let failure = TkmlError::ScriptExecutionFailure {
                    document: program.document.to_string(),
                    message: program.translate_error(&error_message(&e)),
                };
                warn!(document = %program.document, error = %failure, "document failed to compile");
                return Ok(Outcome::Continue(failure.marker()));
            }
        };

        let out = lua.create_table()?;
        let table: Table = lua.globals().get("table")?;
        let concat: Function = table.get("concat")?;
        let renderer = sandbox::value_renderer(lua)?;

        let result: LuaResult<String> = func.call_async((out.clone(), renderer, concat)).await;
        if let Some(outcome) = self.terminated_outcome(ctx)? {
            return Ok(outcome);
        }

        match result {
            Ok(rendered) => Ok(Outcome::Continue(rendered)),
            Err(e) => {
                let mut partial = String::new();
                for i in 1..=out.raw_len() {
                    let piece: LuaResult<String> = out.raw_get(i);
                    if let Ok(piece) = piece {
                        partial.push_str(&piece);
                    }
                }
                let failure = TkmlError::ScriptExecutionFailure {
                    document: program.document.to_string(),
                    message: program.translate_error(&error_message(&e)),
                };
                warn!(document = %program.document, error = %failure, "script failed");
                partial.push_str(&failure.marker());
                Ok(Outcome::Continue(partial))
            }
        }
    }

    async fn run_segment(&self, lua: &Lua, id: &DocumentId, code: &CodeSegment, env: &Table) -> LuaResult<Value> {
        let chunk = match code.kind {
            CodeKind::Expression => format!("return ({}\n)", code.source.trim()),
            CodeKind::Statement => code.source.clone(),
        };
        let func = lua
            .load(chunk.as_str())
            .set_name(format!("={}", id))
            .set_environment(env.clone())
            .into_function()?;

        if code.kind == CodeKind::Expression && !code.may_suspend() {
            func.call(())
        } else {
            func.call_async(()).await
        }
    }

    async fn run_segments(
        &self,
        lua: &Lua,
        ctx: &RequestHandle,
        id: &DocumentId,
        segments: &[Segment],
        env: Table,
    ) -> Result<Outcome> {
        let mut output = String::new();

        for segment in segments {
            let code = match segment {
                Segment::Literal(text) => {
                    output.push_str(text);
                    continue;
                }
                Segment::Code(code) => code,
            };

            let result = self.run_segment(lua, id, code, &env).await;
            if let Some(outcome) = self.terminated_outcome(ctx)? {
                return Ok(outcome);
            }

            match result {
                Ok(value) if code.kind == CodeKind::Expression => {
                    output.push_str(&sandbox::render_value(lua, value)?);
                }
                Ok(_) => {}
                Err(e) => {
                    let message = relocate_error_lines(&error_message(&e), id.as_str(), |line| {
                        Some(line + code.line - 1)
                    });
                    let failure = TkmlError::ScriptExecutionFailure {
                        document: id.to_string(),
                        message,
                    };
                    warn!(document = %id, line = code.line, error = %failure, "segment failed");
                    output.push_str(&failure.marker());
                }
            }
        }

        Ok(Outcome::Continue(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s).unwrap()
    }

    fn engine_with(docs: &[(&str, &str)]) -> (Engine, MemorySource) {
        let source = MemorySource::new();
        for (path, text) in docs {
            source.insert(path, *text);
        }
        (Engine::with_memory_source(source.clone()), source)
    }

    async fn render(engine: &Engine, path: &str) -> Outcome {
        engine.render_path(path, Params::new(), Params::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_expression_renders_in_both_modes() {
        let (engine, _) = engine_with(&[("index.tkml", "Hello <?= 1+1 ?>!")]);
        assert_eq!(render(&engine, "/").await, Outcome::Continue("Hello 2!".to_string()));

        let (engine, _) = engine_with(&[("index.tkml", "Hello <?= 1+1 ?>!")]);
        let engine = engine.with_mode(EvalMode::Segment);
        assert_eq!(render(&engine, "/").await, Outcome::Continue("Hello 2!".to_string()));
    }

    #[tokio::test]
    async fn test_statements_control_literal_output() {
        let (engine, _) = engine_with(&[(
            "list.tkml",
            "<? for i = 1, 3 do ?>[<?= i ?>]<? end ?><? if false then ?>hidden<? end ?>",
        )]);
        assert_eq!(render(&engine, "/list.tkml").await.content(), "[1][2][3]");
    }

    #[tokio::test]
    async fn test_values_render_by_type() {
        let (engine, _) = engine_with(&[(
            "a.tkml",
            "<?= nil ?>|<?= true ?>|<?= 0.5 ?>|<?= { 1, 2 } ?>|<?= 'x' ?>",
        )]);
        assert_eq!(render(&engine, "/a.tkml").await.content(), "|true|0.5|[1,2]|x");
    }

    #[tokio::test]
    async fn test_include_relative_and_root() {
        let (engine, _) = engine_with(&[
            ("pages/index.tkml", "[<?= include('part.tkml') ?>|<?= include('/shared/foot.tkml') ?>]"),
            ("pages/part.tkml", "part"),
            ("shared/foot.tkml", "foot <?= include('../pages/part.tkml') ?>"),
        ]);
        assert_eq!(render(&engine, "/pages/").await.content(), "[part|foot part]");
    }

    #[tokio::test]
    async fn test_self_include_yields_one_marker() {
        let (engine, _) = engine_with(&[("a.tkml", "A<?= include('a.tkml') ?>")]);
        let out = render(&engine, "/a.tkml").await.into_content();
        assert_eq!(out, "A[Error: Circular include detected: a.tkml]");
    }

    #[tokio::test]
    async fn test_indirect_cycle_is_not_cached_below_root() {
        let (engine, _) = engine_with(&[
            ("a.tkml", "A<?= include('b.tkml') ?>"),
            ("b.tkml", "B<?= include('a.tkml') ?>"),
        ]);
        let out = render(&engine, "/a.tkml").await.into_content();
        assert_eq!(out, "AB[Error: Circular include detected: a.tkml]");
        assert_eq!(out.matches("Circular include").count(), 1);

        let cache = engine.cache();
        assert!(cache.contains(Tier::Processed, &id("a.tkml")).unwrap());
        assert!(!cache.contains(Tier::Processed, &id("b.tkml")).unwrap());

        // b on its own renders its own cycle
        let out = render(&engine, "/b.tkml").await.into_content();
        assert_eq!(out, "BA[Error: Circular include detected: b.tkml]");
    }

    #[tokio::test]
    async fn test_sibling_includes_of_same_document() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "<?= include('p.tkml') ?>|<?= include('p.tkml') ?>"),
            ("p.tkml", "P"),
        ]);
        let ctx = RequestHandle::new(RequestContext::new(Params::new(), Params::new()));
        let rendered = engine.render(&id("index.tkml"), &ctx).await.unwrap();
        assert_eq!(rendered.outcome.content(), "P|P");
        assert_eq!(ctx.in_flight_count().unwrap(), 0);
        assert_eq!(rendered.dependencies, [id("p.tkml")].into_iter().collect());
    }

    #[tokio::test]
    async fn test_finish_at_depth_replaces_whole_response() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "top <?= include('a.tkml') ?> after-top"),
            ("a.tkml", "A1 <?= include('b.tkml') ?> A2"),
            ("b.tkml", "B1 <? finish('done') ?> B2"),
        ]);
        assert_eq!(render(&engine, "/").await, Outcome::Terminated("done".to_string()));

        // Served again from cache, termination is re-signalled
        assert_eq!(render(&engine, "/").await, Outcome::Terminated("done".to_string()));
    }

    #[tokio::test]
    async fn test_finish_cannot_be_swallowed_by_pcall() {
        let (engine, _) = engine_with(&[(
            "a.tkml",
            "x<? pcall(finish, 'stop') ?>y<?= include('b.tkml') ?>",
        )]);
        assert_eq!(render(&engine, "/a.tkml").await, Outcome::Terminated("stop".to_string()));

        let (engine, _) = engine_with(&[("a.tkml", "x<? pcall(finish, 'stop') ?>y")]);
        let engine = engine.with_mode(EvalMode::Segment);
        assert_eq!(render(&engine, "/a.tkml").await, Outcome::Terminated("stop".to_string()));
    }

    #[tokio::test]
    async fn test_exports_reach_the_includer() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "<?= include('data.tkml') ?><?= title ?>/<?= count * 2 ?>"),
            ("data.tkml", "<? export('title', 'Hello') ?><? export('count', 21) ?>"),
        ]);
        assert_eq!(render(&engine, "/").await.content(), "Hello/42");

        // Exports are restored when data.tkml comes from the cache
        assert!(engine.cache().contains(Tier::Processed, &id("data.tkml")).unwrap());
        engine.cache().invalidate(&id("index.tkml")).unwrap();
        assert_eq!(render(&engine, "/").await.content(), "Hello/42");
    }

    #[tokio::test]
    async fn test_function_exports_are_not_cached() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "<?= include('lib.tkml') ?><?= double(4) ?>"),
            ("lib.tkml", "<? export('double', function(n) return n * 2 end) ?>"),
        ]);
        assert_eq!(render(&engine, "/").await.content(), "8");
        assert!(!engine.cache().contains(Tier::Processed, &id("lib.tkml")).unwrap());
        assert!(engine.cache().contains(Tier::Processed, &id("index.tkml")).unwrap());
    }

    #[tokio::test]
    async fn test_edited_leaf_refreshes_every_includer() {
        let (engine, source) = engine_with(&[
            ("a.tkml", "A(<?= include('b.tkml') ?>)"),
            ("b.tkml", "B(<?= include('c.tkml') ?>)"),
            ("c.tkml", "old"),
            ("z.tkml", "unrelated"),
        ]);
        assert_eq!(render(&engine, "/a.tkml").await.content(), "A(B(old))");
        assert_eq!(render(&engine, "/z.tkml").await.content(), "unrelated");

        source.edit("c.tkml", "new");
        assert_eq!(render(&engine, "/a.tkml").await.content(), "A(B(new))");
        assert!(engine.cache().contains(Tier::Processed, &id("z.tkml")).unwrap());
    }

    #[tokio::test]
    async fn test_edit_stamped_before_render_is_seen() {
        let source = MemorySource::new();
        let old = SystemTime::now() - Duration::from_secs(60);
        source.insert_at("a.tkml", "A(<?= include('c.tkml') ?>)", old);
        source.insert_at("c.tkml", "old", old);
        let engine = Engine::with_memory_source(source.clone());

        let before_render = SystemTime::now();
        assert_eq!(render(&engine, "/a.tkml").await.content(), "A(old)");

        // A coarse clock can stamp the edit earlier than the render started
        source.insert_at("c.tkml", "new", before_render);
        assert_eq!(render(&engine, "/a.tkml").await.content(), "A(new)");
    }

    #[tokio::test]
    async fn test_mixed_table_exports_render_the_same_from_cache() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "<?= include('data.tkml') ?>[<?= t[1] ?>,<?= t.x ?>]"),
            ("data.tkml", "<? export('t', {10, 20, x = 3}) ?>"),
        ]);
        assert_eq!(render(&engine, "/").await.content(), "[10,3]");
        assert!(!engine.cache().contains(Tier::Processed, &id("data.tkml")).unwrap());

        engine.cache().invalidate(&id("index.tkml")).unwrap();
        assert_eq!(render(&engine, "/").await.content(), "[10,3]");
    }

    #[tokio::test]
    async fn test_nul_before_digit_in_literal_text() {
        let (engine, _) = engine_with(&[("a.tkml", "x\u{0}1y<?= 1 ?>")]);
        assert_eq!(render(&engine, "/a.tkml").await.content(), "x\u{0}1y1");
    }

    #[tokio::test]
    async fn test_idempotent_rendering() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "<?= include('p.tkml') ?> <?= queryParams.q ?>"),
            ("p.tkml", "P"),
        ]);
        let first = engine
            .render_path("/", params(&[("q", "1")]), Params::new())
            .await
            .unwrap();
        let stats = engine.cache().stats().unwrap();
        let second = engine
            .render_path("/", params(&[("q", "1")]), Params::new())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(stats, engine.cache().stats().unwrap());
    }

    #[tokio::test]
    async fn test_parameters_are_part_of_cache_identity() {
        let (engine, _) = engine_with(&[("hi.tkml", "Hi <?= queryParams.name ?> <?= formParams.x ?>")]);
        let a = engine
            .render_path("/hi.tkml", params(&[("name", "ann")]), Params::new())
            .await
            .unwrap();
        let b = engine
            .render_path("/hi.tkml", params(&[("name", "bob")]), params(&[("x", "1")]))
            .await
            .unwrap();
        assert_eq!(a.content(), "Hi ann ");
        assert_eq!(b.content(), "Hi bob 1");
    }

    #[tokio::test]
    async fn test_missing_documents() {
        let (engine, _) = engine_with(&[("index.tkml", "x<?= include('nope.tkml') ?>y")]);
        assert_eq!(
            render(&engine, "/").await.content(),
            "x[Error: Import file not found: nope.tkml]y"
        );

        let err = engine
            .render_path("/missing.tkml", Params::new(), Params::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_parse_failures() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "ok <?= include('broken.tkml') ?>"),
            ("broken.tkml", "text <? never closed"),
        ]);
        let out = render(&engine, "/").await.into_content();
        assert!(out.starts_with("ok [Error: Parse error in broken.tkml"), "{}", out);

        let err = engine
            .render_path("/broken.tkml", Params::new(), Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TkmlError::ParseFailure { .. }));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn test_program_failure_keeps_partial_output() {
        let (engine, _) = engine_with(&[("a.tkml", "before\n<? error('boom') ?> after")]);
        let out = render(&engine, "/a.tkml").await.into_content();
        assert_eq!(out, "before\n[Error: a.tkml:2: boom]");
    }

    #[tokio::test]
    async fn test_segment_failures_are_local() {
        let (engine, _) = engine_with(&[("a.tkml", "a<?= missing.field ?>b<?= 1 + 1 ?>")]);
        let engine = engine.with_mode(EvalMode::Segment);
        let out = render(&engine, "/a.tkml").await.into_content();
        assert!(out.starts_with("a[Error: "), "{}", out);
        assert!(out.ends_with("]b2"), "{}", out);
    }

    #[tokio::test]
    async fn test_segment_mode_include_and_globals() {
        let (engine, _) = engine_with(&[
            ("index.tkml", "<? count = 5 ?><?= include('p.tkml') ?>:<?= count ?>"),
            ("p.tkml", "P"),
        ]);
        let engine = engine.with_mode(EvalMode::Segment);
        assert_eq!(render(&engine, "/").await.content(), "P:5");
    }

    #[tokio::test]
    async fn test_sandbox_blocks_host_access() {
        let (engine, _) = engine_with(&[("a.tkml", "<?= type(io) ?>|<?= type(require) ?>|<?= type(os.execute) ?>")]);
        assert_eq!(render(&engine, "/a.tkml").await.content(), "nil|nil|nil");
    }

    #[tokio::test]
    async fn test_include_path_escaping_root() {
        let (engine, _) = engine_with(&[("a.tkml", "<?= include('../../etc/passwd') ?>")]);
        let out = render(&engine, "/a.tkml").await.into_content();
        assert!(out.starts_with("[Error importing ../../etc/passwd"), "{}", out);
    }
}
