// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Per-request orchestration.
//!
//! A [`RequestOrchestrator`] is built for exactly one inbound request. It
//! owns that request's [`RequestHandle`] and drives the engine, the compiled
//! tier and the markup compiler to a [`TkmlResponse`].

use crate::cache::{CacheEntry, Tier};
use crate::compiler::{MarkupCompiler, PageTemplate};
use crate::context::{RequestContext, RequestHandle};
use crate::document::DocumentId;
use crate::engine::{Engine, Rendered};
use crate::error::{Result, TkmlError};
use crate::request::TkmlRequest;
use crate::response::TkmlResponse;
use std::sync::Arc;
use tracing::{debug, error};

/// Generic body of an unexpected top-level failure.
pub const SERVER_ERROR_BODY: &str = "Server Error";

/// Drives one request through the rendering pipeline.
pub struct RequestOrchestrator {
    engine: Engine,
    compiler: Arc<dyn MarkupCompiler>,
    template: Arc<PageTemplate>,
    request: TkmlRequest,
    context: RequestHandle,
}

impl RequestOrchestrator {
    /// Creates the orchestrator for `request`.
    ///
    /// Query parameters come from the URL; form parameters from the body
    /// of a POST.
    pub fn new(
        engine: Engine,
        compiler: Arc<dyn MarkupCompiler>,
        template: Arc<PageTemplate>,
        request: TkmlRequest,
    ) -> Self {
        let context = RequestHandle::new(RequestContext::new(
            request.query.clone(),
            request.form_params(),
        ));
        Self {
            engine,
            compiler,
            template,
            request,
            context,
        }
    }

    /// Produces the response. Never fails: top-level failures become
    /// error responses.
    pub async fn handle(self) -> TkmlResponse {
        let id = match self.engine.normalizer().from_request_path(&self.request.path) {
            Ok(id) => id,
            Err(e) => {
                debug!(path = %self.request.path, error = %e, "rejected request path");
                return TkmlResponse::not_found(format!("TKML file not found: {}", self.request.path));
            }
        };

        match self.respond(&id).await {
            Ok(response) => response.with_header("Cache-Control", "no-cache"),
            Err(e) if e.is_not_found() => {
                debug!(document = %id, "document not found");
                TkmlResponse::not_found(format!("TKML file not found: {}", id))
            }
            Err(e @ TkmlError::ParseFailure { .. }) => {
                error!(document = %id, error = %e, "document failed to parse");
                TkmlResponse::error(e.status(), e.to_string())
            }
            Err(e) => {
                error!(document = %id, error = %e, "request failed");
                TkmlResponse::error(e.status(), SERVER_ERROR_BODY)
            }
        }
    }

    async fn respond(&self, id: &DocumentId) -> Result<TkmlResponse> {
        if self.request.wants_raw_markup() {
            let rendered = self.engine.render(id, &self.context).await?;
            return Ok(TkmlResponse::markup(200, rendered.outcome.into_content()));
        }

        let cache = self.engine.cache();
        let fingerprint = self.context.fingerprint()?;
        if let Some(entry) = cache.lookup(Tier::Compiled, id, &fingerprint, self.engine.source().as_ref())? {
            return Ok(TkmlResponse::html(200, entry.content.clone()));
        }

        let Rendered {
            outcome,
            mut dependencies,
            versions,
            cacheable,
        } = self.engine.render(id, &self.context).await?;

        let page = self
            .template
            .compile_page(self.compiler.as_ref(), outcome.content())
            .map_err(|e| match e {
                TkmlError::CompileError(_) => e,
                other => TkmlError::CompileError(other.to_string()),
            })?;

        if cacheable {
            dependencies.remove(id);
            cache.store(
                Tier::Compiled,
                id,
                CacheEntry {
                    content: page.clone(),
                    dependencies,
                    versions,
                    fingerprint,
                    terminated: outcome.is_terminated(),
                    exports: None,
                },
            )?;
        }

        Ok(TkmlResponse::html(200, page))
    }
}
