// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Multi-tier document cache.
//!
//! [`CacheManager`] owns three independent tiers keyed by [`DocumentId`]
//! plus the process-wide [`DependencyGraph`]:
//!
//! - **raw**: unmodified document text, unbounded
//! - **processed**: rendered markup of a document (LRU)
//! - **compiled**: full HTML page for a top-level document (LRU)
//!
//! Processed and compiled entries carry the transitive set of documents
//! they were produced from and the modification time each of them had when
//! its text was read. An entry is served only while the document and every
//! dependency still report exactly that modification time, so an edit is
//! noticed even when the filesystem stamps it with an earlier time. A stale
//! hit invalidates the entry, and invalidation fans out through the
//! dependency graph to every document that includes the stale one.
//!
//! The manager is created once at startup and shared by reference; its
//! internal mutex sections are short and never held across an await.

use crate::dependencies::DependencyGraph;
use crate::document::DocumentId;
use crate::error::{Result, TkmlError};
use crate::resolver::DocumentSource;
use lru::LruCache;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, info};

/// Default capacity of the processed and compiled tiers.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Modification time of each document as it was when its text was read.
pub type Versions = BTreeMap<DocumentId, SystemTime>;

/// A processed or compiled output with the data needed to validate it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The produced output.
    pub content: String,
    /// Every document read while producing `content`, at any depth.
    pub dependencies: BTreeSet<DocumentId>,
    /// Modification time of the document and of each dependency it read.
    pub versions: Versions,
    /// Fingerprint of the request parameters the output was produced with.
    pub fingerprint: String,
    /// The output is a termination result rather than a full render.
    pub terminated: bool,
    /// Bindings exported by the document, as a JSON object.
    pub exports: Option<serde_json::Value>,
}

/// Selects one of the cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Unmodified document text.
    Raw,
    /// Rendered markup.
    Processed,
    /// Compiled HTML page.
    Compiled,
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// When false every lookup misses and nothing is stored.
    pub enabled: bool,
    /// Capacity of the processed tier.
    pub processed_capacity: usize,
    /// Capacity of the compiled tier.
    pub compiled_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            processed_capacity: DEFAULT_CAPACITY,
            compiled_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Entry counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Raw tier entries.
    pub raw: usize,
    /// Processed tier entries.
    pub processed: usize,
    /// Compiled tier entries.
    pub compiled: usize,
    /// Documents with recorded dependents.
    pub graph_nodes: usize,
}

#[derive(Debug, Clone)]
struct RawEntry {
    text: String,
    modified: SystemTime,
}

/// The three cache tiers and the dependency graph.
pub struct CacheManager {
    enabled: bool,
    raw: Mutex<HashMap<DocumentId, RawEntry>>,
    processed: Mutex<LruCache<DocumentId, Arc<CacheEntry>>>,
    compiled: Mutex<LruCache<DocumentId, Arc<CacheEntry>>>,
    graph: Mutex<DependencyGraph>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TkmlError::CacheError("Failed to acquire cache lock".to_string()))
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

impl CacheManager {
    /// Creates a manager with the given options.
    pub fn new(options: CacheOptions) -> Self {
        Self {
            enabled: options.enabled,
            raw: Mutex::new(HashMap::new()),
            processed: Mutex::new(LruCache::new(capacity(options.processed_capacity))),
            compiled: Mutex::new(LruCache::new(capacity(options.compiled_capacity))),
            graph: Mutex::new(DependencyGraph::new()),
        }
    }

    /// Creates a manager that never stores anything.
    pub fn disabled() -> Self {
        Self::new(CacheOptions {
            enabled: false,
            ..CacheOptions::default()
        })
    }

    /// Returns the cached text of `id` with the modification time it was
    /// read at, if the document has not been modified since. A modified
    /// document is invalidated.
    pub fn raw_get(&self, id: &DocumentId, source: &dyn DocumentSource) -> Result<Option<(String, SystemTime)>> {
        if !self.enabled {
            return Ok(None);
        }
        let entry = lock(&self.raw)?.get(id).cloned();
        let Some(entry) = entry else {
            return Ok(None);
        };
        match source.modified(id) {
            Some(modified) if modified == entry.modified => Ok(Some((entry.text, entry.modified))),
            _ => {
                debug!(document = %id, "raw content is stale");
                self.invalidate(id)?;
                Ok(None)
            }
        }
    }

    /// Stores the text of `id`, read while its modification time was
    /// `modified`.
    pub fn raw_put(&self, id: &DocumentId, text: &str, modified: SystemTime) -> Result<()> {
        if self.enabled {
            lock(&self.raw)?.insert(
                id.clone(),
                RawEntry {
                    text: text.to_string(),
                    modified,
                },
            );
        }
        Ok(())
    }

    fn tier(&self, tier: Tier) -> Option<&Mutex<LruCache<DocumentId, Arc<CacheEntry>>>> {
        match tier {
            Tier::Raw => None,
            Tier::Processed => Some(&self.processed),
            Tier::Compiled => Some(&self.compiled),
        }
    }

    /// True when `entry`, produced for `id`, is still valid against the
    /// current state of `source`.
    ///
    /// Every dependency is checked against the source directly rather than
    /// against other cache entries. Any change of a modification time,
    /// backwards included, is stale. So is a missing dependency or one
    /// whose text was never read.
    pub fn is_fresh(&self, id: &DocumentId, entry: &CacheEntry, source: &dyn DocumentSource) -> bool {
        std::iter::once(id)
            .chain(entry.dependencies.iter())
            .all(|doc| match (source.modified(doc), entry.versions.get(doc)) {
                (Some(current), Some(recorded)) => current == *recorded,
                _ => false,
            })
    }

    /// Looks up `id` in a processed or compiled tier.
    ///
    /// A stale entry is invalidated (with its dependents) and reported as a
    /// miss. An entry produced with different parameters is a miss but
    /// stays in place.
    pub fn lookup(
        &self,
        tier: Tier,
        id: &DocumentId,
        fingerprint: &str,
        source: &dyn DocumentSource,
    ) -> Result<Option<Arc<CacheEntry>>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(cache) = self.tier(tier) else {
            return Ok(None);
        };
        let entry = lock(cache)?.get(id).cloned();
        let Some(entry) = entry else {
            debug!(document = %id, ?tier, "cache miss");
            return Ok(None);
        };

        if !self.is_fresh(id, &entry, source) {
            debug!(document = %id, ?tier, "cache entry is stale");
            self.invalidate(id)?;
            return Ok(None);
        }
        if entry.fingerprint != fingerprint {
            debug!(document = %id, ?tier, "cache entry was produced with other parameters");
            return Ok(None);
        }

        debug!(document = %id, ?tier, "cache hit");
        Ok(Some(entry))
    }

    /// Stores an entry in a processed or compiled tier.
    pub fn store(&self, tier: Tier, id: &DocumentId, entry: CacheEntry) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(cache) = self.tier(tier) {
            lock(cache)?.put(id.clone(), Arc::new(entry));
        }
        Ok(())
    }

    /// Records that `includer` includes `included`.
    pub fn add_dependency(&self, included: &DocumentId, includer: &DocumentId) -> Result<()> {
        lock(&self.graph)?.add_edge(included, includer);
        Ok(())
    }

    /// Removes `id` from every tier, then every document that includes it
    /// at any depth.
    ///
    /// Graph edges are kept: an includer re-registers its edges when it is
    /// produced again, and a surplus edge only over-invalidates.
    ///
    /// Returns the invalidated documents in visiting order.
    pub fn invalidate(&self, id: &DocumentId) -> Result<Vec<DocumentId>> {
        let dependents = lock(&self.graph)?.transitive_dependents(id);
        let mut order = vec![id.clone()];
        order.extend(dependents.into_iter().filter(|doc| doc != id));

        {
            let mut raw = lock(&self.raw)?;
            let mut processed = lock(&self.processed)?;
            let mut compiled = lock(&self.compiled)?;
            for doc in &order {
                raw.remove(doc);
                processed.pop(doc);
                compiled.pop(doc);
            }
        }

        if order.len() > 1 {
            info!(document = %id, dependents = order.len() - 1, "invalidated dependents");
        } else {
            debug!(document = %id, "invalidated");
        }
        Ok(order)
    }

    /// Empties every tier and the dependency graph.
    pub fn clear_all(&self) -> Result<()> {
        lock(&self.raw)?.clear();
        lock(&self.processed)?.clear();
        lock(&self.compiled)?.clear();
        lock(&self.graph)?.clear();
        info!("cleared all cache tiers");
        Ok(())
    }

    /// Entry counts per tier.
    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            raw: lock(&self.raw)?.len(),
            processed: lock(&self.processed)?.len(),
            compiled: lock(&self.compiled)?.len(),
            graph_nodes: lock(&self.graph)?.len(),
        })
    }

    /// True when `id` has an entry in `tier`, regardless of freshness.
    pub fn contains(&self, tier: Tier, id: &DocumentId) -> Result<bool> {
        match self.tier(tier) {
            Some(cache) => Ok(lock(cache)?.contains(id)),
            None => Ok(lock(&self.raw)?.contains_key(id)),
        }
    }
}
