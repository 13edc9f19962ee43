// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Request-scoped state.
//!
//! A [`RequestContext`] lives exactly as long as one inbound request. It is
//! shared with the Lua callbacks of that request through a cloneable
//! [`RequestHandle`] and never with other requests.
//!
//! Besides the parameter bags and the termination state it tracks, for
//! every document currently being produced, a [`DependencyFrame`]: the
//! documents read so far at any depth with the modification time each one
//! had when it was read, and whether the output may be cached. An output that saw a circular include on a document still in
//! flight outside its own subtree depends on where it was included from,
//! so it is not cacheable; such cycle roots propagate to the enclosing
//! frame until the frame of the cycle's root document is popped.

use crate::cache::Versions;
use crate::document::DocumentId;
use crate::error::{Result, TkmlError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Read-only parameter bag exposed to scripts.
pub type Params = HashMap<String, String>;

/// SHA-256 over both parameter bags, in key order.
pub fn params_fingerprint(query: &Params, form: &Params) -> String {
    let mut hasher = Sha256::new();
    for (tag, params) in [("q", query), ("f", form)] {
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            hasher.update(tag.as_bytes());
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            let value = &params[key];
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Dependencies and cacheability of one document being produced.
#[derive(Debug)]
pub struct DependencyFrame {
    document: DocumentId,
    dependencies: BTreeSet<DocumentId>,
    versions: Versions,
    cycle_roots: HashSet<DocumentId>,
    cacheable: bool,
}

/// What a popped frame produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    /// Transitive dependencies of the document.
    pub dependencies: BTreeSet<DocumentId>,
    /// Modification times of the document and its dependencies as read.
    pub versions: Versions,
    /// Whether the document's output may be stored.
    pub cacheable: bool,
}

/// State of one inbound request.
#[derive(Debug, Default)]
pub struct RequestContext {
    query_params: Params,
    form_params: Params,
    fingerprint: String,
    in_flight: HashSet<DocumentId>,
    terminated: bool,
    termination_result: Option<String>,
    current_dependencies: BTreeSet<DocumentId>,
    frames: Vec<DependencyFrame>,
}

impl RequestContext {
    /// Creates the context for a request with the given parameters.
    pub fn new(query_params: Params, form_params: Params) -> Self {
        let fingerprint = params_fingerprint(&query_params, &form_params);
        Self {
            query_params,
            form_params,
            fingerprint,
            ..Self::default()
        }
    }
}

/// Cloneable handle to a [`RequestContext`].
#[derive(Debug, Clone)]
pub struct RequestHandle {
    inner: Arc<Mutex<RequestContext>>,
}

impl RequestHandle {
    /// Wraps a context.
    pub fn new(context: RequestContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(context)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RequestContext>> {
        self.inner
            .lock()
            .map_err(|_| TkmlError::CacheError("Failed to acquire request context lock".to_string()))
    }

    /// URL query parameters.
    pub fn query_params(&self) -> Result<Params> {
        Ok(self.lock()?.query_params.clone())
    }

    /// Body parameters.
    pub fn form_params(&self) -> Result<Params> {
        Ok(self.lock()?.form_params.clone())
    }

    /// Fingerprint of both parameter bags.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(self.lock()?.fingerprint.clone())
    }

    /// Marks `id` as in flight.
    ///
    /// Returns `None` when it already is, which means the include is
    /// circular. The returned guard removes `id` again when dropped, on
    /// every exit path.
    pub fn enter(&self, id: &DocumentId) -> Result<Option<InFlightGuard>> {
        let mut ctx = self.lock()?;
        if !ctx.in_flight.insert(id.clone()) {
            return Ok(None);
        }
        Ok(Some(InFlightGuard {
            handle: self.clone(),
            id: id.clone(),
        }))
    }

    /// True when `id` is currently being produced.
    pub fn is_in_flight(&self, id: &DocumentId) -> Result<bool> {
        Ok(self.lock()?.in_flight.contains(id))
    }

    /// Number of documents currently in flight.
    pub fn in_flight_count(&self) -> Result<usize> {
        Ok(self.lock()?.in_flight.len())
    }

    /// Records the termination result. Only the first call wins.
    pub fn terminate(&self, result: String) -> Result<()> {
        let mut ctx = self.lock()?;
        if !ctx.terminated {
            ctx.terminated = true;
            ctx.termination_result = Some(result);
        }
        Ok(())
    }

    /// True once `finish` ran anywhere in the request.
    pub fn is_terminated(&self) -> Result<bool> {
        Ok(self.lock()?.terminated)
    }

    /// The termination result, if terminated.
    pub fn termination_result(&self) -> Result<Option<String>> {
        Ok(self.lock()?.termination_result.clone())
    }

    /// Every document the request depended on so far.
    pub fn current_dependencies(&self) -> Result<BTreeSet<DocumentId>> {
        Ok(self.lock()?.current_dependencies.clone())
    }

    /// Opens the dependency frame of `document`.
    pub fn push_frame(&self, document: &DocumentId) -> Result<()> {
        self.lock()?.frames.push(DependencyFrame {
            document: document.clone(),
            dependencies: BTreeSet::new(),
            versions: Versions::new(),
            cycle_roots: HashSet::new(),
            cacheable: true,
        });
        Ok(())
    }

    /// Records that the document of the innermost frame depends on `id`.
    pub fn record_dependency(&self, id: &DocumentId) -> Result<()> {
        let mut ctx = self.lock()?;
        ctx.current_dependencies.insert(id.clone());
        if let Some(frame) = ctx.frames.last_mut() {
            frame.dependencies.insert(id.clone());
        }
        Ok(())
    }

    /// Records the modification time `id` had when its text was read.
    pub fn record_version(&self, id: &DocumentId, modified: SystemTime) -> Result<()> {
        if let Some(frame) = self.lock()?.frames.last_mut() {
            frame.versions.insert(id.clone(), modified);
        }
        Ok(())
    }

    /// Adds the dependencies and versions of a cached output to the
    /// innermost frame.
    pub fn absorb_cached(&self, dependencies: &BTreeSet<DocumentId>, versions: &Versions) -> Result<()> {
        let mut ctx = self.lock()?;
        ctx.current_dependencies.extend(dependencies.iter().cloned());
        if let Some(frame) = ctx.frames.last_mut() {
            frame.dependencies.extend(dependencies.iter().cloned());
            frame
                .versions
                .extend(versions.iter().map(|(id, modified)| (id.clone(), *modified)));
        }
        Ok(())
    }

    /// Notes that the innermost frame hit a circular include on `target`.
    pub fn record_cycle(&self, target: &DocumentId) -> Result<()> {
        if let Some(frame) = self.lock()?.frames.last_mut() {
            frame.cycle_roots.insert(target.clone());
        }
        Ok(())
    }

    /// Marks the innermost frame's output as not cacheable.
    pub fn mark_uncacheable(&self) -> Result<()> {
        if let Some(frame) = self.lock()?.frames.last_mut() {
            frame.cacheable = false;
        }
        Ok(())
    }

    /// Closes the innermost frame, folding its dependencies and any
    /// unresolved cycle roots into the enclosing frame.
    pub fn pop_frame(&self) -> Result<FrameSummary> {
        let mut ctx = self.lock()?;
        let Some(mut frame) = ctx.frames.pop() else {
            return Err(TkmlError::CacheError("dependency frame stack is empty".to_string()));
        };
        frame.cycle_roots.remove(&frame.document);
        let cacheable = frame.cacheable && frame.cycle_roots.is_empty();

        if let Some(parent) = ctx.frames.last_mut() {
            parent.dependencies.insert(frame.document.clone());
            parent.dependencies.extend(frame.dependencies.iter().cloned());
            parent
                .versions
                .extend(frame.versions.iter().map(|(id, modified)| (id.clone(), *modified)));
            parent.cycle_roots.extend(frame.cycle_roots);
        }

        Ok(FrameSummary {
            dependencies: frame.dependencies,
            versions: frame.versions,
            cacheable,
        })
    }
}

/// Keeps a document in the in-flight set while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    handle: RequestHandle,
    id: DocumentId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ctx = match self.handle.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ctx.in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s).unwrap()
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs)
    }

    fn handle() -> RequestHandle {
        RequestHandle::new(RequestContext::new(Params::new(), Params::new()))
    }

    #[test]
    fn test_in_flight_guard_removes_on_drop() {
        let ctx = handle();
        {
            let guard = ctx.enter(&id("a.tkml")).unwrap();
            assert!(guard.is_some());
            assert!(ctx.enter(&id("a.tkml")).unwrap().is_none());
        }
        assert_eq!(ctx.in_flight_count().unwrap(), 0);
        assert!(ctx.enter(&id("a.tkml")).unwrap().is_some());
    }

    #[test]
    fn test_first_termination_wins() {
        let ctx = handle();
        assert!(!ctx.is_terminated().unwrap());
        ctx.terminate("first".to_string()).unwrap();
        ctx.terminate("second".to_string()).unwrap();
        assert!(ctx.is_terminated().unwrap());
        assert_eq!(ctx.termination_result().unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_frames_accumulate_transitively() {
        let ctx = handle();
        ctx.push_frame(&id("a.tkml")).unwrap();
        ctx.record_version(&id("a.tkml"), at(1)).unwrap();
        ctx.record_dependency(&id("b.tkml")).unwrap();
        ctx.push_frame(&id("b.tkml")).unwrap();
        ctx.record_version(&id("b.tkml"), at(2)).unwrap();
        ctx.record_dependency(&id("c.tkml")).unwrap();
        let cached: Versions = [(id("c.tkml"), at(3))].into_iter().collect();
        ctx.absorb_cached(&BTreeSet::new(), &cached).unwrap();

        let b = ctx.pop_frame().unwrap();
        assert_eq!(b.dependencies, [id("c.tkml")].into_iter().collect());
        assert_eq!(b.versions.len(), 2);
        assert!(b.cacheable);

        let a = ctx.pop_frame().unwrap();
        assert_eq!(a.dependencies, [id("b.tkml"), id("c.tkml")].into_iter().collect());
        assert_eq!(
            a.versions,
            [(id("a.tkml"), at(1)), (id("b.tkml"), at(2)), (id("c.tkml"), at(3))]
                .into_iter()
                .collect::<Versions>()
        );
        assert_eq!(ctx.current_dependencies().unwrap().len(), 2);
    }

    #[test]
    fn test_cycle_roots_block_caching_until_root_frame() {
        // a includes b, b includes a (circular)
        let ctx = handle();
        ctx.push_frame(&id("a.tkml")).unwrap();
        ctx.push_frame(&id("b.tkml")).unwrap();
        ctx.record_cycle(&id("a.tkml")).unwrap();

        let b = ctx.pop_frame().unwrap();
        assert!(!b.cacheable);
        let a = ctx.pop_frame().unwrap();
        assert!(a.cacheable);
    }

    #[test]
    fn test_uncacheable_does_not_propagate() {
        let ctx = handle();
        ctx.push_frame(&id("a.tkml")).unwrap();
        ctx.push_frame(&id("b.tkml")).unwrap();
        ctx.mark_uncacheable().unwrap();
        assert!(!ctx.pop_frame().unwrap().cacheable);
        assert!(ctx.pop_frame().unwrap().cacheable);
        assert!(ctx.pop_frame().is_err());
    }

    #[test]
    fn test_fingerprint_depends_on_params() {
        let mut q = Params::new();
        q.insert("name".to_string(), "x".to_string());
        let empty = Params::new();
        assert_ne!(params_fingerprint(&q, &empty), params_fingerprint(&empty, &q));
        assert_ne!(params_fingerprint(&q, &empty), params_fingerprint(&empty, &empty));
        assert_eq!(params_fingerprint(&q, &empty), params_fingerprint(&q.clone(), &empty));
        assert_eq!(params_fingerprint(&empty, &empty).len(), 64);
    }
}
